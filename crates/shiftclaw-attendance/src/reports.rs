//! Digest payloads handed to the rendering layer.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use shiftclaw_core::{BreakKind, GroupId, Result};
use std::collections::BTreeMap;

use crate::aggregate::{Aggregator, KindTotals, MemberRow, RankedMember, WindowSummary};
use crate::clock::{ZoneResolution, date_bounds, day_bounds, local_date, week_bounds};

/// Daily digest for one local date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyReport {
    pub group: GroupId,
    pub date: NaiveDate,
    pub timezone: String,
    pub timezone_fallback: Option<String>,
    pub summary: WindowSummary,
    pub members: Vec<MemberRow>,
}

/// Totals of one day inside a weekly report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub checkin_count: u32,
    pub work_minutes: i64,
    pub kinds: BTreeMap<BreakKind, KindTotals>,
}

/// Monday-to-Sunday digest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyReport {
    pub group: GroupId,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub timezone: String,
    pub timezone_fallback: Option<String>,
    pub summary: WindowSummary,
    pub days: Vec<DaySummary>,
    pub members: Vec<MemberRow>,
}

/// Short digest: check-ins, smoke and toilet totals, and the top few members.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompactDigest {
    pub group: GroupId,
    pub date: NaiveDate,
    pub timezone: String,
    pub checkins: u32,
    pub smoke: KindTotals,
    pub toilet: KindTotals,
    pub top: Vec<RankedMember>,
}

pub fn daily_report(
    aggregator: &Aggregator,
    group: GroupId,
    zone: &ZoneResolution,
    reference: DateTime<Utc>,
    now: DateTime<Utc>,
    top_n: usize,
) -> Result<DailyReport> {
    let window = day_bounds(zone.tz, reference);
    Ok(DailyReport {
        group,
        date: local_date(zone.tz, reference),
        timezone: zone.name().to_string(),
        timezone_fallback: zone.fallback_from.clone(),
        summary: aggregator.summarize_window(group, &window, now, top_n)?,
        members: aggregator.per_member_table(group, &window, now)?,
    })
}

pub fn weekly_report(
    aggregator: &Aggregator,
    group: GroupId,
    zone: &ZoneResolution,
    reference: DateTime<Utc>,
    now: DateTime<Utc>,
    top_n: usize,
) -> Result<WeeklyReport> {
    let window = week_bounds(zone.tz, reference);
    let week_start = local_date(zone.tz, window.start);
    let days = (0..7)
        .map(|offset| day_summary(aggregator, group, zone.tz, week_start + Duration::days(offset), now))
        .collect::<Result<Vec<_>>>()?;

    Ok(WeeklyReport {
        group,
        week_start,
        week_end: week_start + Duration::days(6),
        timezone: zone.name().to_string(),
        timezone_fallback: zone.fallback_from.clone(),
        summary: aggregator.summarize_window(group, &window, now, top_n)?,
        days,
        members: aggregator.per_member_table(group, &window, now)?,
    })
}

pub fn compact_digest(
    aggregator: &Aggregator,
    group: GroupId,
    zone: &ZoneResolution,
    reference: DateTime<Utc>,
    now: DateTime<Utc>,
    top_n: usize,
) -> Result<CompactDigest> {
    let window = day_bounds(zone.tz, reference);
    let summary = aggregator.summarize_window(group, &window, now, top_n)?;
    Ok(CompactDigest {
        group,
        date: local_date(zone.tz, reference),
        timezone: zone.name().to_string(),
        checkins: summary.checkin_count,
        smoke: summary.kind(BreakKind::Smoke),
        toilet: summary.kind(BreakKind::Toilet),
        top: summary.top_checkins,
    })
}

fn day_summary(
    aggregator: &Aggregator,
    group: GroupId,
    tz: Tz,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<DaySummary> {
    let summary = aggregator.summarize_window(group, &date_bounds(tz, date), now, 0)?;
    Ok(DaySummary {
        date,
        checkin_count: summary.checkin_count,
        work_minutes: summary.work_minutes,
        kinds: summary.kinds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::resolve_timezone;
    use crate::store::{MemoryStore, SessionStore};
    use chrono::TimeZone;
    use shiftclaw_core::MemberId;
    use std::sync::Arc;

    const G: GroupId = GroupId(3);

    #[test]
    fn test_weekly_report_has_seven_days() {
        let store = Arc::new(MemoryStore::new());
        let agg = Aggregator::new(store.clone());
        let zone = resolve_timezone("Asia/Phnom_Penh");

        // Tuesday 2024-03-05 09:00 local.
        let tuesday = Utc.with_ymd_and_hms(2024, 3, 5, 2, 0, 0).unwrap();
        store.add_checkin(G, MemberId(1), "Sok", tuesday).unwrap();
        let b = store.insert_break(G, MemberId(1), BreakKind::Smoke, tuesday).unwrap();
        store.close_break(b.id, tuesday + Duration::minutes(7)).unwrap();

        let report = weekly_report(&agg, G, &zone, tuesday, tuesday + Duration::hours(1), 5).unwrap();
        assert_eq!(report.week_start, NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert_eq!(report.week_end, NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());
        assert_eq!(report.days.len(), 7);
        assert_eq!(report.days[1].checkin_count, 1);
        assert_eq!(report.days[1].kinds[&BreakKind::Smoke], KindTotals { count: 1, minutes: 7 });
        assert_eq!(report.days[0].checkin_count, 0);
        assert_eq!(report.summary.kind(BreakKind::Smoke).minutes, 7);
        assert_eq!(report.members.len(), 1);
    }

    #[test]
    fn test_daily_report_uses_local_date_and_reports_fallback() {
        let store = Arc::new(MemoryStore::new());
        let agg = Aggregator::new(store);
        let zone = resolve_timezone("Not/AZone");
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 23, 0, 0).unwrap();

        let report = daily_report(&agg, G, &zone, at, at, 5).unwrap();
        assert_eq!(report.date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(report.timezone, "UTC");
        assert_eq!(report.timezone_fallback.as_deref(), Some("Not/AZone"));
        assert!(report.members.is_empty());

        let digest = compact_digest(&agg, G, &zone, at, at, 3).unwrap();
        assert_eq!(digest.checkins, 0);
        assert!(digest.top.is_empty());
    }
}
