//! Group jobs: which callbacks a group should have, and what they do when
//! they fire.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use shiftclaw_core::{Result, ShiftClawConfig};
use shiftclaw_scheduler::{
    CallbackSpec, FiredTask, Notification, NotifyPriority, NotifyRouter, NotifySink, TaskAction,
    TaskHandler, WorkEdge, dispatch_best_effort, keys,
};

use crate::clock::{local_date, next_occurrence, resolve_timezone};
use crate::models::GroupSettings;
use crate::service::Attendance;

const SOURCE: &str = "shiftclaw";

/// Recurring registrations implied by a group's settings, first fire times
/// computed from `now`.
///
/// - greeting: daily at `greeting_time`
/// - work reminders: weekly, `remind_before` minutes ahead of each window edge
/// - daily report: daily at `report_time`
/// - weekly report: weekly on the configured weekday at `report_time`
pub fn desired_callbacks(
    settings: &GroupSettings,
    config: &ShiftClawConfig,
    now: DateTime<Utc>,
) -> Vec<CallbackSpec> {
    let group = settings.group;
    let tz = resolve_timezone(&settings.timezone).tz;
    let zone = tz.name();
    let day = Duration::days(1);
    let week = Duration::weeks(1);
    let mut specs = Vec::new();

    if let Some(at) = settings.greeting_time {
        specs.push(CallbackSpec::recurring(
            keys::greeting(group, zone, at),
            next_occurrence(tz, None, at, now),
            day,
            TaskAction::Greeting { group },
        ));
    }

    if let Some(schedule) = &settings.work_schedule {
        let lead = Duration::minutes(i64::from(config.reminders.remind_before_minutes));
        for window in &schedule.days {
            for (edge, at) in [(WorkEdge::Start, window.start), (WorkEdge::End, window.end)] {
                let first = next_occurrence(tz, Some(window.weekday), at, now + lead) - lead;
                specs.push(CallbackSpec::recurring(
                    keys::work_reminder(group, zone, window.weekday, edge, at),
                    first,
                    week,
                    TaskAction::WorkReminder {
                        group,
                        weekday: window.weekday,
                        edge,
                        at,
                    },
                ));
            }
        }
    }

    if let Some(at) = settings.report_time {
        specs.push(CallbackSpec::recurring(
            keys::daily_report(group, zone, at),
            next_occurrence(tz, None, at, now),
            day,
            TaskAction::DailyReport { group },
        ));
        let weekday = config.reports.weekly_weekday;
        specs.push(CallbackSpec::recurring(
            keys::weekly_report(group, zone, weekday, at),
            next_occurrence(tz, Some(weekday), at, now),
            week,
            TaskAction::WeeklyReport { group },
        ));
    }

    specs
}

/// Turns fired tasks into notifications and hands them to the sink.
pub struct JobRunner {
    attendance: Arc<Attendance>,
    sink: Arc<dyn NotifySink>,
    router: Mutex<NotifyRouter>,
}

impl JobRunner {
    pub fn new(attendance: Arc<Attendance>, sink: Arc<dyn NotifySink>) -> Self {
        Self {
            attendance,
            sink,
            router: Mutex::new(NotifyRouter::new()),
        }
    }

    /// Recently produced notifications.
    pub fn history(&self) -> Vec<Notification> {
        self.router
            .lock()
            .map(|r| r.history().to_vec())
            .unwrap_or_default()
    }

    /// Notification for a fired task, or `None` when live state says there is
    /// nothing to announce.
    pub fn notification_for(&self, fired: &FiredTask) -> Result<Option<Notification>> {
        let group = fired.action.group();
        let settings = self.attendance.settings_for(group)?;
        let zone = resolve_timezone(&settings.timezone);
        let now = fired.fired_at;

        let notification = match &fired.action {
            TaskAction::BreakTimeout { member, kind, .. } => {
                let Some(overdue) = self
                    .attendance
                    .check_break_overdue(group, *member, *kind, now)?
                else {
                    tracing::debug!("Break timer '{}' fired for a closed or newer break", fired.key);
                    return Ok(None);
                };
                NotifyRouter::create(
                    group,
                    "break_overdue",
                    json!({
                        "language": settings.language,
                        "member": member,
                        "display_name": overdue.display_name,
                        "kind": kind,
                        "minutes": overdue.minutes,
                        "limit_minutes": overdue.limit_minutes,
                        "started_at": overdue.session.start,
                    }),
                    SOURCE,
                    NotifyPriority::High,
                )
            }
            TaskAction::PenaltyEnd { member, kind, .. } => NotifyRouter::create(
                group,
                "penalty_over",
                json!({
                    "language": settings.language,
                    "member": member,
                    "display_name": self.attendance.aggregator().display_name(group, *member)?,
                    "kind": kind,
                }),
                SOURCE,
                NotifyPriority::Normal,
            ),
            TaskAction::Greeting { .. } => NotifyRouter::create(
                group,
                "greeting",
                json!({
                    "language": settings.language,
                    "date": local_date(zone.tz, fired.scheduled_for),
                    "timezone": zone.name(),
                }),
                SOURCE,
                NotifyPriority::Low,
            ),
            TaskAction::WorkReminder { weekday, edge, at, .. } => NotifyRouter::create(
                group,
                "work_reminder",
                json!({
                    "language": settings.language,
                    "weekday": weekday.to_string(),
                    "edge": edge,
                    "at": at,
                    "minutes_before": self.attendance.config().reminders.remind_before_minutes,
                    "timezone": zone.name(),
                }),
                SOURCE,
                NotifyPriority::Normal,
            ),
            TaskAction::DailyReport { .. } => {
                let report = self
                    .attendance
                    .daily_report_payload(group, fired.scheduled_for, now)?;
                NotifyRouter::create(
                    group,
                    "daily_report",
                    json!({ "language": settings.language, "report": report }),
                    SOURCE,
                    NotifyPriority::Normal,
                )
            }
            TaskAction::WeeklyReport { .. } => {
                let report = self
                    .attendance
                    .weekly_report_payload(group, fired.scheduled_for, now)?;
                NotifyRouter::create(
                    group,
                    "weekly_report",
                    json!({ "language": settings.language, "report": report }),
                    SOURCE,
                    NotifyPriority::Normal,
                )
            }
        };

        Ok(Some(notification))
    }
}

#[async_trait]
impl TaskHandler for JobRunner {
    async fn handle(&self, fired: &FiredTask) {
        let notification = match self.notification_for(fired) {
            Ok(Some(n)) => n,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("⚠️ Job '{}' failed: {e}", fired.key);
                return;
            }
        };

        dispatch_best_effort(self.sink.as_ref(), &notification).await;
        if let Ok(mut router) = self.router.lock() {
            router.record(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Actor;
    use chrono::{TimeZone, Weekday};
    use shiftclaw_core::{BreakKind, GroupId, HourMinute, MemberId, WorkSchedule};
    use shiftclaw_scheduler::MemorySink;

    const G: GroupId = GroupId(11);
    const M: MemberId = MemberId(5);

    fn settings(tz: &str) -> GroupSettings {
        GroupSettings {
            timezone: tz.into(),
            ..GroupSettings::defaults(G, &ShiftClawConfig::default())
        }
    }

    fn fired(action: TaskAction, at: DateTime<Utc>) -> FiredTask {
        FiredTask {
            key: "test".into(),
            action,
            scheduled_for: at,
            fired_at: at,
            run_count: 1,
        }
    }

    #[test]
    fn test_no_settings_no_jobs() {
        let specs = desired_callbacks(&settings("UTC"), &ShiftClawConfig::default(), Utc::now());
        assert!(specs.is_empty());
    }

    #[test]
    fn test_full_settings_job_set() {
        let mut s = settings("UTC");
        s.greeting_time = Some(HourMinute::new(7, 0).unwrap());
        s.report_time = Some(HourMinute::new(21, 0).unwrap());
        s.work_schedule = Some(WorkSchedule::parse_range("08:00-22:00").unwrap());

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let specs = desired_callbacks(&s, &ShiftClawConfig::default(), now);
        // greeting + 7 days x 2 edges + daily + weekly
        assert_eq!(specs.len(), 17);
        assert!(specs.iter().all(|spec| spec.key.starts_with(&keys::group_jobs(G))));

        let weekly = specs
            .iter()
            .find(|spec| matches!(spec.action, TaskAction::WeeklyReport { .. }))
            .unwrap();
        // First Sunday 21:00 after Friday 2024-03-01.
        assert_eq!(
            weekly.task_type,
            shiftclaw_scheduler::TaskType::Recurring {
                first: Utc.with_ymd_and_hms(2024, 3, 3, 21, 0, 0).unwrap(),
                every_secs: 7 * 24 * 3600,
            }
        );
    }

    #[test]
    fn test_work_start_reminder_in_new_york() {
        let mut s = settings("America/New_York");
        s.work_schedule = Some(WorkSchedule {
            days: vec![shiftclaw_core::DayWindow {
                weekday: Weekday::Mon,
                start: HourMinute::new(8, 0).unwrap(),
                end: HourMinute::new(17, 0).unwrap(),
            }],
        });
        // Tuesday before the DST switch.
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 15, 0, 0).unwrap();
        let specs = desired_callbacks(&s, &ShiftClawConfig::default(), now);
        let start = specs
            .iter()
            .find(|spec| matches!(spec.action, TaskAction::WorkReminder { edge: WorkEdge::Start, .. }))
            .unwrap();
        let shiftclaw_scheduler::TaskType::Recurring { first, .. } = start.task_type else {
            panic!("work reminders recur");
        };
        // 07:55 EDT on Monday 2024-03-11.
        assert_eq!(first, Utc.with_ymd_and_hms(2024, 3, 11, 11, 55, 0).unwrap());
    }

    fn runner() -> (Arc<Attendance>, Arc<MemorySink>, JobRunner) {
        let attendance = Arc::new(Attendance::in_memory(ShiftClawConfig::default()));
        let sink = Arc::new(MemorySink::new());
        let runner = JobRunner::new(attendance.clone(), sink.clone());
        (attendance, sink, runner)
    }

    #[tokio::test]
    async fn test_break_timeout_after_stop_is_a_noop() {
        let (attendance, sink, runner) = runner();
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        attendance.start_break(G, M, BreakKind::Smoke, start).await.unwrap();
        attendance
            .stop_break(G, M, BreakKind::Smoke, start + Duration::minutes(3))
            .await
            .unwrap();

        let action = TaskAction::BreakTimeout { group: G, member: M, kind: BreakKind::Smoke };
        runner.handle(&fired(action, start + Duration::minutes(10))).await;
        assert!(sink.delivered().is_empty());
        assert!(runner.history().is_empty());
    }

    #[tokio::test]
    async fn test_break_timeout_fires_through_scheduler() {
        let (attendance, sink, runner) = runner();
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        attendance.start_break(G, M, BreakKind::Smoke, start).await.unwrap();

        let due = attendance.scheduler().lock().await.tick(start + Duration::minutes(10));
        assert_eq!(due.len(), 1);
        runner.handle(&due[0]).await;

        let delivered = sink.delivered();
        assert_eq!(sink.titles(), vec!["break_overdue"]);
        assert_eq!(delivered[0].priority, NotifyPriority::High);
        assert_eq!(delivered[0].body["minutes"], 10);
        assert_eq!(delivered[0].body["kind"], "smoke");
    }

    #[tokio::test]
    async fn test_daily_report_notification_carries_payload() {
        let (attendance, sink, runner) = runner();
        let admin = Actor { member: MemberId(1), elevated: true };
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        attendance.set_language(G, admin, "vi", at).await.unwrap();
        attendance.check_in(G, M, "Lan", at).await.unwrap();

        runner
            .handle(&fired(TaskAction::DailyReport { group: G }, at + Duration::hours(12)))
            .await;

        let delivered = sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].title, "daily_report");
        assert_eq!(delivered[0].body["language"], "vi");
        assert_eq!(delivered[0].body["report"]["summary"]["checkin_count"], 1);
        assert_eq!(runner.history().len(), 1);
    }

    #[tokio::test]
    async fn test_scheduler_loop_drives_runner() {
        let attendance = Arc::new(Attendance::in_memory(ShiftClawConfig::default()));
        let sink = Arc::new(MemorySink::new());
        let runner = Arc::new(JobRunner::new(attendance.clone(), sink.clone()));
        attendance
            .scheduler()
            .lock()
            .await
            .schedule_once(Utc::now() - Duration::seconds(1), "group:11:jobs:once", TaskAction::Greeting { group: G });

        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(shiftclaw_scheduler::spawn_scheduler(
            attendance.scheduler().clone(),
            runner,
            1,
            rx,
        ));
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(sink.titles(), vec!["greeting"]);
    }
}
