//! Shared domain types: identifiers, break kinds and wall-clock schedules.

use std::fmt;
use std::str::FromStr;

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShiftClawError};

/// Chat/channel scope within which rules and settings are configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub i64);

/// Participant identifier, unique within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub i64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of timed break. Each kind carries its own [`BreakPolicy`] in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakKind {
    Smoke,
    Toilet,
    Takeout,
}

impl BreakKind {
    pub const ALL: [BreakKind; 3] = [BreakKind::Smoke, BreakKind::Toilet, BreakKind::Takeout];

    pub fn as_str(&self) -> &'static str {
        match self {
            BreakKind::Smoke => "smoke",
            BreakKind::Toilet => "toilet",
            BreakKind::Takeout => "takeout",
        }
    }
}

impl fmt::Display for BreakKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BreakKind {
    type Err = ShiftClawError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smoke" => Ok(BreakKind::Smoke),
            "toilet" | "wc" => Ok(BreakKind::Toilet),
            "takeout" => Ok(BreakKind::Takeout),
            other => Err(ShiftClawError::Validation(format!("unknown break kind '{other}'"))),
        }
    }
}

/// Time limit and daily quota for one break kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakPolicy {
    pub limit_minutes: u32,
    pub max_per_day: u32,
}

impl BreakPolicy {
    pub fn validate(&self, kind: BreakKind) -> Result<()> {
        if self.limit_minutes == 0 {
            return Err(ShiftClawError::Validation(format!(
                "{kind}: limit_minutes must be greater than zero"
            )));
        }
        if self.max_per_day == 0 {
            return Err(ShiftClawError::Validation(format!(
                "{kind}: max_per_day must be greater than zero"
            )));
        }
        Ok(())
    }
}

/// Local wall-clock time of day, stored as "HH:MM".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HourMinute {
    pub hour: u32,
    pub minute: u32,
}

impl HourMinute {
    pub fn new(hour: u32, minute: u32) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(ShiftClawError::Validation(format!(
                "invalid time of day {hour:02}:{minute:02}"
            )));
        }
        Ok(Self { hour, minute })
    }
}

impl fmt::Display for HourMinute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for HourMinute {
    type Err = ShiftClawError;

    fn from_str(s: &str) -> Result<Self> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| ShiftClawError::Validation(format!("expected HH:MM, got '{s}'")))?;
        let hour = h
            .parse::<u32>()
            .map_err(|_| ShiftClawError::Validation(format!("invalid hour in '{s}'")))?;
        let minute = m
            .parse::<u32>()
            .map_err(|_| ShiftClawError::Validation(format!("invalid minute in '{s}'")))?;
        Self::new(hour, minute)
    }
}

impl Serialize for HourMinute {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HourMinute {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Work window for a single weekday, e.g. Mon 08:00-22:00.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayWindow {
    pub weekday: Weekday,
    pub start: HourMinute,
    pub end: HourMinute,
}

/// Per-weekday work windows of a group. Days without an entry are off days.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSchedule {
    pub days: Vec<DayWindow>,
}

impl WorkSchedule {
    /// Same window on every day of the week.
    pub fn uniform(start: HourMinute, end: HourMinute) -> Result<Self> {
        let schedule = Self {
            days: (0..7)
                .map(|d| DayWindow {
                    weekday: weekday_from_monday(d),
                    start,
                    end,
                })
                .collect(),
        };
        schedule.validate()?;
        Ok(schedule)
    }

    /// Parse "HH:MM-HH:MM" into a uniform schedule.
    pub fn parse_range(range: &str) -> Result<Self> {
        let (start, end) = range
            .split_once('-')
            .ok_or_else(|| ShiftClawError::Validation(format!("expected HH:MM-HH:MM, got '{range}'")))?;
        Self::uniform(start.parse()?, end.parse()?)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = [false; 7];
        for day in &self.days {
            if day.start >= day.end {
                return Err(ShiftClawError::Validation(format!(
                    "{}: work window {}-{} ends before it starts",
                    day.weekday, day.start, day.end
                )));
            }
            let idx = day.weekday.num_days_from_monday() as usize;
            if seen[idx] {
                return Err(ShiftClawError::Validation(format!(
                    "{}: more than one work window",
                    day.weekday
                )));
            }
            seen[idx] = true;
        }
        Ok(())
    }
}

/// Monday = 0 ... Sunday = 6.
pub fn weekday_from_monday(n: u32) -> Weekday {
    match n % 7 {
        0 => Weekday::Mon,
        1 => Weekday::Tue,
        2 => Weekday::Wed,
        3 => Weekday::Thu,
        4 => Weekday::Fri,
        5 => Weekday::Sat,
        _ => Weekday::Sun,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hour_minute_parse() {
        let hm: HourMinute = "07:50".parse().unwrap();
        assert_eq!(hm, HourMinute { hour: 7, minute: 50 });
        assert_eq!(hm.to_string(), "07:50");
        assert!("24:00".parse::<HourMinute>().is_err());
        assert!("8".parse::<HourMinute>().is_err());
    }

    #[test]
    fn test_break_kind_from_str() {
        assert_eq!("Smoke".parse::<BreakKind>().unwrap(), BreakKind::Smoke);
        assert_eq!("wc".parse::<BreakKind>().unwrap(), BreakKind::Toilet);
        assert!("nap".parse::<BreakKind>().is_err());
    }

    #[test]
    fn test_policy_validation() {
        let ok = BreakPolicy { limit_minutes: 10, max_per_day: 3 };
        assert!(ok.validate(BreakKind::Smoke).is_ok());
        let bad = BreakPolicy { limit_minutes: 0, max_per_day: 3 };
        assert!(bad.validate(BreakKind::Smoke).is_err());
    }

    #[test]
    fn test_work_schedule_range() {
        let schedule = WorkSchedule::parse_range("08:00-22:00").unwrap();
        assert_eq!(schedule.days.len(), 7);
        let saturday = schedule.days.iter().find(|d| d.weekday == Weekday::Sat).unwrap();
        assert_eq!(saturday.end.hour, 22);
        assert!(WorkSchedule::parse_range("22:00-08:00").is_err());
    }
}
