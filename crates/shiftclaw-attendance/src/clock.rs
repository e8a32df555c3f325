//! Timezone-aware day/week windows and next-occurrence computation.
//! Pure functions; no storage access.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use shiftclaw_core::HourMinute;

/// Longest DST gap we probe across when a local time does not exist.
const MAX_GAP_MINUTES: i64 = 3 * 60;

/// UTC window of a local day or week. `end` is the last whole second
/// (23:59:59 local) for display; membership is half-open against
/// `end_exclusive`, so sub-second instants before midnight still belong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// First instant after the window.
    pub fn end_exclusive(&self) -> DateTime<Utc> {
        self.end + Duration::seconds(1)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end_exclusive()
    }

    /// Whether a session `[start, end]` touches the window. Open sessions
    /// (`end == None`) extend indefinitely.
    pub fn overlaps(&self, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> bool {
        start < self.end_exclusive() && end.is_none_or(|e| e >= self.start)
    }

    /// Whole minutes of `[start, end)` that fall inside the window.
    pub fn clipped_minutes(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
        let lo = start.max(self.start);
        let hi = end.min(self.end_exclusive());
        if hi > lo { (hi - lo).num_minutes() } else { 0 }
    }
}

/// Result of resolving a stored timezone name.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneResolution {
    pub tz: Tz,
    /// The rejected name when resolution fell back to UTC.
    pub fallback_from: Option<String>,
}

impl ZoneResolution {
    pub fn name(&self) -> &'static str {
        self.tz.name()
    }
}

/// Resolve an IANA zone name. Unknown names fall back to UTC and report the
/// rejected name so the settings layer can correct it.
pub fn resolve_timezone(name: &str) -> ZoneResolution {
    match name.trim().parse::<Tz>() {
        Ok(tz) => ZoneResolution { tz, fallback_from: None },
        Err(_) => {
            tracing::warn!("🌐 Unknown timezone '{name}', falling back to UTC");
            ZoneResolution {
                tz: Tz::UTC,
                fallback_from: Some(name.to_string()),
            }
        }
    }
}

/// Whether `name` is a valid IANA zone.
pub fn is_valid_timezone(name: &str) -> bool {
    name.trim().parse::<Tz>().is_ok()
}

/// Local calendar date of `at` in `tz`.
pub fn local_date(tz: Tz, at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&tz).date_naive()
}

/// Local 00:00:00–23:59:59 of the date containing `reference`.
pub fn day_bounds(tz: Tz, reference: DateTime<Utc>) -> Window {
    let date = local_date(tz, reference);
    window_between_dates(tz, date, date + Duration::days(1))
}

/// Monday 00:00:00 through Sunday 23:59:59 local, containing `reference`.
pub fn week_bounds(tz: Tz, reference: DateTime<Utc>) -> Window {
    let date = local_date(tz, reference);
    let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
    window_between_dates(tz, monday, monday + Duration::days(7))
}

/// Bounds of the local day `date`.
pub fn date_bounds(tz: Tz, date: NaiveDate) -> Window {
    window_between_dates(tz, date, date + Duration::days(1))
}

fn window_between_dates(tz: Tz, first: NaiveDate, next: NaiveDate) -> Window {
    let start = start_of_day(tz, first);
    let end = start_of_day(tz, next) - Duration::seconds(1);
    Window::new(start, end)
}

/// First instant of a local date. Midnight may be skipped or repeated by DST;
/// the earliest valid instant wins.
fn start_of_day(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(t) => t.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => skip_gap(tz, midnight),
    }
}

/// Map a naive local time to an instant: the later candidate when the time
/// occurs twice, the first valid instant after the gap when it never occurs.
pub fn resolve_local(tz: Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => t.with_timezone(&Utc),
        LocalResult::Ambiguous(_, latest) => latest.with_timezone(&Utc),
        LocalResult::None => skip_gap(tz, naive),
    }
}

fn skip_gap(tz: Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    let mut probe = naive;
    for _ in 0..MAX_GAP_MINUTES {
        probe += Duration::minutes(1);
        if let Some(t) = tz.from_local_datetime(&probe).earliest() {
            return t.with_timezone(&Utc);
        }
    }
    // No zone has a gap this long; treat the wall time as UTC.
    Utc.from_utc_datetime(&naive)
}

/// Next instant strictly after `reference` at which local time equals `at`,
/// restricted to `weekday` when given.
pub fn next_occurrence(
    tz: Tz,
    weekday: Option<Weekday>,
    at: HourMinute,
    reference: DateTime<Utc>,
) -> DateTime<Utc> {
    let today = local_date(tz, reference);
    // Start one day back: a late-evening reference in a gap-resolved zone can
    // still have today's slot ahead of it.
    for offset in -1..=8 {
        let date = today + Duration::days(offset);
        if weekday.is_some_and(|wd| date.weekday() != wd) {
            continue;
        }
        let Some(naive) = date.and_hms_opt(at.hour, at.minute, 0) else {
            continue;
        };
        let candidate = resolve_local(tz, naive);
        if candidate > reference {
            return candidate;
        }
    }
    // Unreachable for valid input: every weekday recurs within 8 days.
    reference + Duration::days(7)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_phnom_penh_day_bounds() {
        let tz = resolve_timezone("Asia/Phnom_Penh").tz;
        let window = day_bounds(tz, utc(2024, 3, 1, 23, 50, 0));
        assert_eq!(window.start, utc(2024, 3, 1, 17, 0, 0));
        assert_eq!(window.end, utc(2024, 3, 2, 16, 59, 59));
        assert!(window.contains(utc(2024, 3, 2, 0, 5, 0)));
    }

    #[test]
    fn test_week_bounds_monday_to_sunday() {
        // Wednesday 2024-03-06 in UTC.
        let window = week_bounds(Tz::UTC, utc(2024, 3, 6, 12, 0, 0));
        assert_eq!(window.start, utc(2024, 3, 4, 0, 0, 0));
        assert_eq!(window.end, utc(2024, 3, 10, 23, 59, 59));
    }

    #[test]
    fn test_day_bounds_across_dst_start() {
        let tz = resolve_timezone("America/New_York").tz;
        // 2024-03-10 is 23 hours long in New York.
        let window = day_bounds(tz, utc(2024, 3, 10, 15, 0, 0));
        assert_eq!(window.start, utc(2024, 3, 10, 5, 0, 0));
        assert_eq!(window.end, utc(2024, 3, 11, 3, 59, 59));
    }

    #[test]
    fn test_next_monday_in_new_york_after_dst() {
        let tz = resolve_timezone("America/New_York").tz;
        // Tuesday 2024-03-05 10:00 EST; the next Monday is after the DST switch.
        let reference = utc(2024, 3, 5, 15, 0, 0);
        let fire = next_occurrence(tz, Some(Weekday::Mon), HourMinute::new(8, 0).unwrap(), reference);
        assert_eq!(fire, utc(2024, 3, 11, 12, 0, 0));
    }

    #[test]
    fn test_next_occurrence_same_day_and_strictly_after() {
        let tz = Tz::UTC;
        let at = HourMinute::new(21, 0).unwrap();
        assert_eq!(next_occurrence(tz, None, at, utc(2024, 3, 1, 20, 0, 0)), utc(2024, 3, 1, 21, 0, 0));
        assert_eq!(next_occurrence(tz, None, at, utc(2024, 3, 1, 21, 0, 0)), utc(2024, 3, 2, 21, 0, 0));
    }

    #[test]
    fn test_ambiguous_time_prefers_later() {
        let tz = resolve_timezone("America/New_York").tz;
        // 01:30 happens twice on 2024-11-03: 05:30Z (EDT) and 06:30Z (EST).
        let fire = next_occurrence(tz, None, HourMinute::new(1, 30).unwrap(), utc(2024, 11, 3, 4, 0, 0));
        assert_eq!(fire, utc(2024, 11, 3, 6, 30, 0));
    }

    #[test]
    fn test_nonexistent_time_skips_forward() {
        let tz = resolve_timezone("America/New_York").tz;
        // 02:30 does not exist on 2024-03-10; first valid instant is 03:00 EDT.
        let fire = next_occurrence(tz, None, HourMinute::new(2, 30).unwrap(), utc(2024, 3, 10, 5, 0, 0));
        assert_eq!(fire, utc(2024, 3, 10, 7, 0, 0));
    }

    #[test]
    fn test_unknown_zone_falls_back_to_utc() {
        let zone = resolve_timezone("Mars/Olympus_Mons");
        assert_eq!(zone.tz, Tz::UTC);
        assert_eq!(zone.fallback_from.as_deref(), Some("Mars/Olympus_Mons"));
        assert!(resolve_timezone("UTC").fallback_from.is_none());
    }

    #[test]
    fn test_clipped_minutes_across_midnight() {
        let day1 = day_bounds(Tz::UTC, utc(2024, 3, 1, 12, 0, 0));
        let day2 = day_bounds(Tz::UTC, utc(2024, 3, 2, 12, 0, 0));
        let (s, e) = (utc(2024, 3, 1, 23, 50, 0), utc(2024, 3, 2, 0, 10, 0));
        assert_eq!(day1.clipped_minutes(s, e), 10);
        assert_eq!(day2.clipped_minutes(s, e), 10);
        assert!(day1.overlaps(s, Some(e)));
        assert!(!day1.overlaps(utc(2024, 3, 2, 0, 0, 0), None));
    }

    #[test]
    fn test_subsecond_instants_before_midnight_stay_in_day() {
        let last = utc(2024, 3, 1, 23, 59, 59) + Duration::milliseconds(300);
        let day1 = day_bounds(Tz::UTC, last);
        let day2 = day_bounds(Tz::UTC, utc(2024, 3, 2, 0, 0, 0));
        assert!(day1.contains(last));
        assert!(!day2.contains(last));
        assert!(!day1.contains(utc(2024, 3, 2, 0, 0, 0)));
        assert!(day1.overlaps(last, None));
    }
}
