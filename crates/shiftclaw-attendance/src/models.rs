//! Durable records owned by the session store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shiftclaw_core::{BreakKind, GroupId, HourMinute, MemberId, ShiftClawConfig, WorkSchedule};

/// An accepted check-in. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInEvent {
    pub id: i64,
    pub group: GroupId,
    pub member: MemberId,
    pub display_name: String,
    pub at: DateTime<Utc>,
}

/// One continuous work shift. `end == None` while the shift is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSession {
    pub id: i64,
    pub group: GroupId,
    pub member: MemberId,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

/// One timed break of a given kind. `end == None` while the break is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakSession {
    pub id: i64,
    pub group: GroupId,
    pub member: MemberId,
    pub kind: BreakKind,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl WorkSession {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }
}

impl BreakSession {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Elapsed whole minutes at `now` (or at the recorded end).
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> i64 {
        elapsed_minutes(self.start, self.end.unwrap_or(now))
    }
}

/// floor((end - start) / 60s), never negative.
pub fn elapsed_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    ((end - start).num_seconds() / 60).max(0)
}

/// Per-group settings. Missing groups use configured defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSettings {
    pub group: GroupId,
    pub timezone: String,
    pub language: String,
    pub work_schedule: Option<WorkSchedule>,
    pub report_time: Option<HourMinute>,
    pub greeting_time: Option<HourMinute>,
}

impl GroupSettings {
    pub fn defaults(group: GroupId, config: &ShiftClawConfig) -> Self {
        Self {
            group,
            timezone: config.default_timezone.clone(),
            language: config.default_language.clone(),
            work_schedule: None,
            report_time: None,
            greeting_time: None,
        }
    }
}
