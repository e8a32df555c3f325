//! Attendance service: the surface exposed to the messaging layer.
//!
//! Wires the engine, aggregator, stores and scheduler together: resolves the
//! group's timezone and policies, runs the engine operation, then arms or
//! cancels the deferred callbacks that follow from the outcome.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use shiftclaw_core::{
    BreakKind, GroupId, HourMinute, MemberId, Result, ShiftClawConfig, WorkSchedule,
};
use shiftclaw_scheduler::{ReconcileReport, SchedulerEngine, SharedScheduler, TaskAction, keys};

use crate::aggregate::{Aggregator, MemberRow, MemberStats, RankedMember, WindowSummary};
use crate::clock::{Window, ZoneResolution, day_bounds, is_valid_timezone, resolve_timezone};
use crate::engine::{
    AttendanceEngine, BreakStartOutcome, BreakStopOutcome, CheckInOutcome, WorkStartOutcome,
    WorkStopOutcome,
};
use crate::jobs::desired_callbacks;
use crate::models::{BreakSession, GroupSettings};
use crate::reports::{self, CompactDigest, DailyReport, WeeklyReport};
use crate::store::{MemoryStore, SessionStore, SettingsStore, SqliteStore};

/// Languages a group may switch to.
pub const SUPPORTED_LANGUAGES: [&str; 3] = ["zh", "en", "vi"];

/// Outcome plus the timezone it was evaluated in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply<T> {
    pub outcome: T,
    pub timezone: String,
    /// Stored zone name that failed to resolve, if any.
    pub timezone_fallback: Option<String>,
}

impl<T> Reply<T> {
    fn new(outcome: T, zone: &ZoneResolution) -> Self {
        Self {
            outcome,
            timezone: zone.name().to_string(),
            timezone_fallback: zone.fallback_from.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakStopReply {
    pub outcome: BreakStopOutcome,
    pub limit_minutes: u32,
    /// End of the penalty window when the break ran over.
    pub penalty_until: Option<DateTime<Utc>>,
}

/// An open break past its limit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverdueBreak {
    pub session: BreakSession,
    pub display_name: String,
    pub minutes: i64,
    pub limit_minutes: u32,
}

/// Who is changing settings. `elevated` comes from the chat platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub member: MemberId,
    pub elevated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SettingsOutcome {
    Updated { settings: GroupSettings },
    NotElevated,
    InvalidTimezone { name: String },
    UnsupportedLanguage { language: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub groups: usize,
    pub jobs: usize,
    pub break_timers: usize,
}

pub struct Attendance {
    config: ShiftClawConfig,
    engine: AttendanceEngine,
    aggregator: Aggregator,
    settings: Arc<dyn SettingsStore>,
    scheduler: SharedScheduler,
}

impl Attendance {
    pub fn new(
        config: ShiftClawConfig,
        sessions: Arc<dyn SessionStore>,
        settings: Arc<dyn SettingsStore>,
        scheduler: SharedScheduler,
    ) -> Self {
        Self {
            config,
            engine: AttendanceEngine::new(sessions.clone()),
            aggregator: Aggregator::new(sessions),
            settings,
            scheduler,
        }
    }

    /// Service over a SQLite database at `path`.
    pub fn open_sqlite(config: ShiftClawConfig, path: &Path, scheduler: SharedScheduler) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(path)?);
        tracing::info!("💾 Attendance database: {}", path.display());
        Ok(Self::new(config, store.clone(), store, scheduler))
    }

    /// Service over a volatile in-memory store with its own scheduler.
    pub fn in_memory(config: ShiftClawConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(config, store.clone(), store, SchedulerEngine::shared())
    }

    pub fn config(&self) -> &ShiftClawConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &SharedScheduler {
        &self.scheduler
    }

    pub fn engine(&self) -> &AttendanceEngine {
        &self.engine
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Stored settings, or the configured defaults.
    pub fn settings_for(&self, group: GroupId) -> Result<GroupSettings> {
        Ok(self
            .settings
            .group_settings(group)?
            .unwrap_or_else(|| GroupSettings::defaults(group, &self.config)))
    }

    pub fn zone_for(&self, group: GroupId) -> Result<ZoneResolution> {
        Ok(resolve_timezone(&self.settings_for(group)?.timezone))
    }

    /// The group's local day containing `at`.
    pub fn day_window(&self, group: GroupId, at: DateTime<Utc>) -> Result<(Window, ZoneResolution)> {
        let zone = self.zone_for(group)?;
        Ok((day_bounds(zone.tz, at), zone))
    }

    // ── Session operations ─────────────────────────────────

    pub async fn check_in(
        &self,
        group: GroupId,
        member: MemberId,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Reply<CheckInOutcome>> {
        let (day, zone) = self.day_window(group, now)?;
        let outcome = self.engine.check_in(group, member, display_name, now, &day).await?;
        Ok(Reply::new(outcome, &zone))
    }

    pub async fn start_work(
        &self,
        group: GroupId,
        member: MemberId,
        now: DateTime<Utc>,
    ) -> Result<WorkStartOutcome> {
        self.engine.start_work(group, member, now).await
    }

    pub async fn stop_work(
        &self,
        group: GroupId,
        member: MemberId,
        now: DateTime<Utc>,
    ) -> Result<WorkStopOutcome> {
        self.engine.stop_work(group, member, now).await
    }

    /// Open a break and arm its timeout at start + limit.
    pub async fn start_break(
        &self,
        group: GroupId,
        member: MemberId,
        kind: BreakKind,
        now: DateTime<Utc>,
    ) -> Result<Reply<BreakStartOutcome>> {
        let policy = self.config.breaks.policy(kind);
        let (day, zone) = self.day_window(group, now)?;
        let outcome = self
            .engine
            .start_break(group, member, kind, now, &day, policy.max_per_day)
            .await?;

        if let BreakStartOutcome::Started { session } = &outcome {
            self.arm_break_timeout(session).await;
        }
        Ok(Reply::new(outcome, &zone))
    }

    /// Close a break, cancel its timeout, and arm the penalty-end notice when
    /// the break ran over.
    pub async fn stop_break(
        &self,
        group: GroupId,
        member: MemberId,
        kind: BreakKind,
        now: DateTime<Utc>,
    ) -> Result<BreakStopReply> {
        let limit_minutes = self.config.breaks.policy(kind).limit_minutes;
        let outcome = self
            .engine
            .stop_break(group, member, kind, now, limit_minutes)
            .await?;

        let mut penalty_until = None;
        if let BreakStopOutcome::Stopped { over_limit, .. } = &outcome {
            let mut scheduler = self.scheduler.lock().await;
            scheduler.cancel(&keys::break_timeout(group, member, kind));
            if *over_limit && self.config.penalty.minutes > 0 {
                let until = now + Duration::minutes(i64::from(self.config.penalty.minutes));
                scheduler.schedule_once(
                    until,
                    &keys::penalty(group, member, kind),
                    TaskAction::PenaltyEnd { group, member, kind },
                );
                penalty_until = Some(until);
            }
        }

        Ok(BreakStopReply {
            outcome,
            limit_minutes,
            penalty_until,
        })
    }

    /// Live re-check for a firing break timeout. `None` when the break is
    /// already closed or the open one has not reached its limit yet.
    pub fn check_break_overdue(
        &self,
        group: GroupId,
        member: MemberId,
        kind: BreakKind,
        now: DateTime<Utc>,
    ) -> Result<Option<OverdueBreak>> {
        let Some(session) = self.engine.store().open_break(group, member, kind)? else {
            return Ok(None);
        };
        let limit_minutes = self.config.breaks.policy(kind).limit_minutes;
        let minutes = session.elapsed_minutes(now);
        if minutes < i64::from(limit_minutes) {
            return Ok(None);
        }
        Ok(Some(OverdueBreak {
            display_name: self.aggregator.display_name(group, member)?,
            session,
            minutes,
            limit_minutes,
        }))
    }

    async fn arm_break_timeout(&self, session: &BreakSession) {
        let limit = self.config.breaks.policy(session.kind).limit_minutes;
        let fire_at = session.start + Duration::minutes(i64::from(limit));
        self.scheduler.lock().await.schedule_once(
            fire_at,
            &keys::break_timeout(session.group, session.member, session.kind),
            TaskAction::BreakTimeout {
                group: session.group,
                member: session.member,
                kind: session.kind,
            },
        );
    }

    // ── Aggregates and reports ─────────────────────────────

    pub fn summarize_window(
        &self,
        group: GroupId,
        window: &Window,
        now: DateTime<Utc>,
        top_n: usize,
    ) -> Result<WindowSummary> {
        self.aggregator.summarize_window(group, window, now, top_n)
    }

    pub fn per_member_table(
        &self,
        group: GroupId,
        window: &Window,
        now: DateTime<Utc>,
    ) -> Result<Vec<MemberRow>> {
        self.aggregator.per_member_table(group, window, now)
    }

    pub fn leaderboard(
        &self,
        group: GroupId,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<RankedMember>> {
        self.aggregator.leaderboard(group, since, limit)
    }

    pub fn member_stats(&self, group: GroupId, member: MemberId) -> Result<MemberStats> {
        self.aggregator.member_stats(group, member)
    }

    pub fn daily_report_payload(
        &self,
        group: GroupId,
        reference: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<DailyReport> {
        let zone = self.zone_for(group)?;
        reports::daily_report(&self.aggregator, group, &zone, reference, now, self.config.reports.top_n)
    }

    pub fn weekly_report_payload(
        &self,
        group: GroupId,
        reference: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<WeeklyReport> {
        let zone = self.zone_for(group)?;
        reports::weekly_report(&self.aggregator, group, &zone, reference, now, self.config.reports.top_n)
    }

    pub fn compact_digest(
        &self,
        group: GroupId,
        reference: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<CompactDigest> {
        let zone = self.zone_for(group)?;
        reports::compact_digest(
            &self.aggregator,
            group,
            &zone,
            reference,
            now,
            self.config.reports.compact_top_n,
        )
    }

    // ── Settings ───────────────────────────────────────────

    pub async fn set_timezone(
        &self,
        group: GroupId,
        actor: Actor,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<SettingsOutcome> {
        if !is_valid_timezone(name) {
            return Ok(SettingsOutcome::InvalidTimezone { name: name.to_string() });
        }
        self.update_settings(group, actor, now, |s| s.timezone = name.trim().to_string())
            .await
    }

    pub async fn set_language(
        &self,
        group: GroupId,
        actor: Actor,
        language: &str,
        now: DateTime<Utc>,
    ) -> Result<SettingsOutcome> {
        let language = language.trim().to_ascii_lowercase();
        if !SUPPORTED_LANGUAGES.contains(&language.as_str()) {
            return Ok(SettingsOutcome::UnsupportedLanguage { language });
        }
        self.update_settings(group, actor, now, |s| s.language = language).await
    }

    pub async fn set_report_time(
        &self,
        group: GroupId,
        actor: Actor,
        at: Option<HourMinute>,
        now: DateTime<Utc>,
    ) -> Result<SettingsOutcome> {
        self.update_settings(group, actor, now, |s| s.report_time = at).await
    }

    pub async fn set_greeting_time(
        &self,
        group: GroupId,
        actor: Actor,
        at: Option<HourMinute>,
        now: DateTime<Utc>,
    ) -> Result<SettingsOutcome> {
        self.update_settings(group, actor, now, |s| s.greeting_time = at).await
    }

    /// Replace the work schedule. An invalid schedule is a validation error.
    pub async fn set_work_schedule(
        &self,
        group: GroupId,
        actor: Actor,
        schedule: Option<WorkSchedule>,
        now: DateTime<Utc>,
    ) -> Result<SettingsOutcome> {
        if let Some(schedule) = &schedule {
            schedule.validate()?;
        }
        self.update_settings(group, actor, now, |s| s.work_schedule = schedule).await
    }

    async fn update_settings(
        &self,
        group: GroupId,
        actor: Actor,
        now: DateTime<Utc>,
        apply: impl FnOnce(&mut GroupSettings),
    ) -> Result<SettingsOutcome> {
        if !actor.elevated {
            tracing::info!("🔒 Member {} tried to change settings of group {group}", actor.member);
            return Ok(SettingsOutcome::NotElevated);
        }
        let mut settings = self.settings_for(group)?;
        apply(&mut settings);
        self.settings.put_group_settings(&settings)?;
        tracing::info!("⚙️ Group {group} settings updated by {}", actor.member);
        self.sync_group_jobs(group, now).await?;
        Ok(SettingsOutcome::Updated { settings })
    }

    // ── Scheduled jobs ─────────────────────────────────────

    /// Make the group's recurring jobs match its settings.
    pub async fn sync_group_jobs(&self, group: GroupId, now: DateTime<Utc>) -> Result<ReconcileReport> {
        let settings = self.settings_for(group)?;
        let desired = desired_callbacks(&settings, &self.config, now);
        let report = self
            .scheduler
            .lock()
            .await
            .reconcile(&keys::group_jobs(group), desired, now);
        Ok(report)
    }

    /// Rebuild every registration after a restart: group jobs from settings,
    /// break timeouts from open breaks. Overdue timeouts fire on the next tick.
    /// Penalty-end notices pending at shutdown are not restored.
    pub async fn restore_timers(&self, now: DateTime<Utc>) -> Result<RestoreReport> {
        let mut report = RestoreReport::default();

        for group in self.settings.known_groups()? {
            let synced = self.sync_group_jobs(group, now).await?;
            report.groups += 1;
            report.jobs += synced.added + synced.kept;
        }

        for session in self.engine.store().all_open_breaks()? {
            self.arm_break_timeout(&session).await;
            report.break_timers += 1;
        }

        tracing::info!(
            "♻️ Restored {} group(s), {} job(s), {} break timer(s)",
            report.groups,
            report.jobs,
            report.break_timers
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const G: GroupId = GroupId(-42);
    const M: MemberId = MemberId(7);
    const ADMIN: Actor = Actor { member: MemberId(1), elevated: true };

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    fn service() -> Attendance {
        Attendance::in_memory(ShiftClawConfig::default())
    }

    #[tokio::test]
    async fn test_break_arms_and_cancels_timeout() {
        let svc = service();
        let reply = svc.start_break(G, M, BreakKind::Smoke, t(10, 0)).await.unwrap();
        assert!(matches!(reply.outcome, BreakStartOutcome::Started { .. }));

        let key = keys::break_timeout(G, M, BreakKind::Smoke);
        assert_eq!(svc.scheduler().lock().await.get(&key).unwrap().next_run, t(10, 10));

        let stop = svc.stop_break(G, M, BreakKind::Smoke, t(10, 4)).await.unwrap();
        assert!(stop.penalty_until.is_none());
        assert!(svc.scheduler().lock().await.get(&key).is_none());
    }

    #[tokio::test]
    async fn test_over_limit_arms_penalty_end() {
        let svc = service();
        svc.start_break(G, M, BreakKind::Toilet, t(10, 0)).await.unwrap();
        let stop = svc.stop_break(G, M, BreakKind::Toilet, t(10, 25)).await.unwrap();

        assert_eq!(stop.limit_minutes, 20);
        assert_eq!(stop.penalty_until, Some(t(10, 30)));
        let scheduler = svc.scheduler().lock().await;
        assert!(scheduler.get(&keys::penalty(G, M, BreakKind::Toilet)).is_some());
    }

    #[tokio::test]
    async fn test_overdue_check_uses_live_session() {
        let svc = service();
        svc.start_break(G, M, BreakKind::Smoke, t(10, 0)).await.unwrap();
        assert!(svc.check_break_overdue(G, M, BreakKind::Smoke, t(10, 5)).unwrap().is_none());
        let overdue = svc.check_break_overdue(G, M, BreakKind::Smoke, t(10, 10)).unwrap().unwrap();
        assert_eq!(overdue.minutes, 10);
        assert_eq!(overdue.display_name, "7");

        // Closed, then reopened: the old timer's instant is not overdue for the new session.
        svc.stop_break(G, M, BreakKind::Smoke, t(10, 12)).await.unwrap();
        assert!(svc.check_break_overdue(G, M, BreakKind::Smoke, t(10, 13)).unwrap().is_none());
        svc.start_break(G, M, BreakKind::Smoke, t(10, 15)).await.unwrap();
        assert!(svc.check_break_overdue(G, M, BreakKind::Smoke, t(10, 20)).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_settings_need_elevation() {
        let svc = service();
        let member = Actor { member: M, elevated: false };
        let outcome = svc.set_timezone(G, member, "Asia/Phnom_Penh", t(0, 0)).await.unwrap();
        assert_eq!(outcome, SettingsOutcome::NotElevated);
        assert_eq!(svc.settings_for(G).unwrap().timezone, "UTC");

        let outcome = svc.set_timezone(G, ADMIN, "Nowhere/Town", t(0, 0)).await.unwrap();
        assert!(matches!(outcome, SettingsOutcome::InvalidTimezone { .. }));

        let outcome = svc.set_language(G, ADMIN, "fr", t(0, 0)).await.unwrap();
        assert!(matches!(outcome, SettingsOutcome::UnsupportedLanguage { .. }));

        let outcome = svc.set_timezone(G, ADMIN, "Asia/Phnom_Penh", t(0, 0)).await.unwrap();
        assert!(matches!(outcome, SettingsOutcome::Updated { .. }));
        assert_eq!(svc.zone_for(G).unwrap().name(), "Asia/Phnom_Penh");
    }

    #[tokio::test]
    async fn test_report_time_change_reconciles_jobs() {
        let svc = service();
        let prefix = keys::group_jobs(G);
        let at = HourMinute::new(21, 0).unwrap();

        svc.set_report_time(G, ADMIN, Some(at), t(8, 0)).await.unwrap();
        let registered = svc.scheduler().lock().await.keys_with_prefix(&prefix);
        assert_eq!(registered.len(), 2);
        assert!(registered.contains(&keys::daily_report(G, "UTC", at)));

        let later = HourMinute::new(22, 0).unwrap();
        svc.set_report_time(G, ADMIN, Some(later), t(8, 0)).await.unwrap();
        let scheduler = svc.scheduler().lock().await;
        assert!(scheduler.get(&keys::daily_report(G, "UTC", at)).is_none());
        assert_eq!(scheduler.get(&keys::daily_report(G, "UTC", later)).unwrap().next_run, t(22, 0));
    }

    #[tokio::test]
    async fn test_report_time_off_drops_report_jobs() {
        let svc = service();
        let at = HourMinute::new(21, 0).unwrap();
        svc.set_report_time(G, ADMIN, Some(at), t(8, 0)).await.unwrap();
        svc.set_report_time(G, ADMIN, None, t(8, 5)).await.unwrap();
        let registered = svc.scheduler().lock().await.keys_with_prefix(&keys::group_jobs(G));
        assert!(registered.is_empty());
    }

    #[tokio::test]
    async fn test_timezone_change_rearms_existing_jobs() {
        let svc = service();
        let at = HourMinute::new(21, 0).unwrap();
        svc.set_report_time(G, ADMIN, Some(at), t(8, 0)).await.unwrap();
        svc.set_timezone(G, ADMIN, "Asia/Phnom_Penh", t(8, 0)).await.unwrap();

        // 21:00 in Phnom Penh is 14:00 UTC.
        let scheduler = svc.scheduler().lock().await;
        assert!(scheduler.get(&keys::daily_report(G, "UTC", at)).is_none());
        let rearmed = scheduler.get(&keys::daily_report(G, "Asia/Phnom_Penh", at)).unwrap();
        assert_eq!(rearmed.next_run, t(14, 0));
        assert_eq!(scheduler.keys_with_prefix(&keys::group_jobs(G)).len(), 2);
    }

    #[tokio::test]
    async fn test_restore_rearms_open_breaks_and_jobs() {
        let store = Arc::new(MemoryStore::new());
        let first = Attendance::new(ShiftClawConfig::default(), store.clone(), store.clone(), SchedulerEngine::shared());
        first
            .set_greeting_time(G, ADMIN, Some(HourMinute::new(7, 0).unwrap()), t(6, 0))
            .await
            .unwrap();
        first.start_break(GroupId(99), M, BreakKind::Takeout, t(6, 30)).await.unwrap();

        // Fresh scheduler, same store.
        let second = Attendance::new(ShiftClawConfig::default(), store.clone(), store, SchedulerEngine::shared());
        let report = second.restore_timers(t(6, 45)).await.unwrap();
        assert_eq!(report, RestoreReport { groups: 1, jobs: 1, break_timers: 1 });

        let scheduler = second.scheduler().lock().await;
        let timer = scheduler.get(&keys::break_timeout(GroupId(99), M, BreakKind::Takeout)).unwrap();
        assert_eq!(timer.next_run, t(7, 0));
    }

    #[tokio::test]
    async fn test_check_in_reply_reports_fallback_zone() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_group_settings(&GroupSettings {
                timezone: "Bad/Zone".into(),
                ..GroupSettings::defaults(G, &ShiftClawConfig::default())
            })
            .unwrap();
        let svc = Attendance::new(ShiftClawConfig::default(), store.clone(), store, SchedulerEngine::shared());

        let reply = svc.check_in(G, M, "Linh", t(9, 0)).await.unwrap();
        assert!(matches!(reply.outcome, CheckInOutcome::CheckedIn { .. }));
        assert_eq!(reply.timezone, "UTC");
        assert_eq!(reply.timezone_fallback.as_deref(), Some("Bad/Zone"));
    }
}
