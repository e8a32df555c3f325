//! Task definitions: the data model for deferred callbacks.

use chrono::{DateTime, Duration, Utc, Weekday};
use serde::{Deserialize, Serialize};
use shiftclaw_core::{BreakKind, GroupId, HourMinute, MemberId};

/// A registered callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique registration ID.
    pub id: String,
    /// Lookup key; also the unit of cancellation.
    pub key: String,
    /// What to do when triggered.
    pub action: TaskAction,
    /// When/how to trigger.
    pub task_type: TaskType,
    /// Created timestamp.
    pub created_at: DateTime<Utc>,
    /// Last triggered timestamp.
    pub last_run: Option<DateTime<Utc>>,
    /// Next scheduled run.
    pub next_run: DateTime<Utc>,
    /// How many times this task has run.
    pub run_count: u32,
}

/// What the task does when triggered. Every action is scoped to a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskAction {
    /// Warn if the member's break of `kind` is still open past its limit.
    BreakTimeout {
        group: GroupId,
        member: MemberId,
        kind: BreakKind,
    },
    /// Announce the end of a penalty window after an over-limit break.
    PenaltyEnd {
        group: GroupId,
        member: MemberId,
        kind: BreakKind,
    },
    /// Daily greeting message.
    Greeting { group: GroupId },
    /// Reminder shortly before a work window opens or closes.
    WorkReminder {
        group: GroupId,
        weekday: Weekday,
        edge: WorkEdge,
        at: HourMinute,
    },
    /// Daily digest report.
    DailyReport { group: GroupId },
    /// Weekly digest report.
    WeeklyReport { group: GroupId },
}

impl TaskAction {
    pub fn group(&self) -> GroupId {
        match self {
            TaskAction::BreakTimeout { group, .. }
            | TaskAction::PenaltyEnd { group, .. }
            | TaskAction::Greeting { group }
            | TaskAction::WorkReminder { group, .. }
            | TaskAction::DailyReport { group }
            | TaskAction::WeeklyReport { group } => *group,
        }
    }
}

/// Which edge of a work window a reminder precedes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkEdge {
    Start,
    End,
}

impl std::fmt::Display for WorkEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkEdge::Start => write!(f, "start"),
            WorkEdge::End => write!(f, "end"),
        }
    }
}

/// How/when the task triggers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    /// Run once at a specific time.
    Once { at: DateTime<Utc> },
    /// Run at `first`, then every `every_secs` after the previous scheduled
    /// fire time (fixed-rate).
    Recurring { first: DateTime<Utc>, every_secs: i64 },
}

impl TaskType {
    fn first_run(&self) -> DateTime<Utc> {
        match self {
            TaskType::Once { at } => *at,
            TaskType::Recurring { first, .. } => *first,
        }
    }
}

/// Desired registration, as computed from group settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackSpec {
    pub key: String,
    pub action: TaskAction,
    pub task_type: TaskType,
}

impl CallbackSpec {
    pub fn once(key: impl Into<String>, at: DateTime<Utc>, action: TaskAction) -> Self {
        Self {
            key: key.into(),
            action,
            task_type: TaskType::Once { at },
        }
    }

    pub fn recurring(
        key: impl Into<String>,
        first: DateTime<Utc>,
        every: Duration,
        action: TaskAction,
    ) -> Self {
        Self {
            key: key.into(),
            action,
            task_type: TaskType::Recurring {
                first,
                every_secs: every.num_seconds(),
            },
        }
    }

    /// Same registration apart from the computed first fire time.
    pub fn same_job(&self, task: &Task) -> bool {
        if self.key != task.key || self.action != task.action {
            return false;
        }
        match (&self.task_type, &task.task_type) {
            (TaskType::Once { at: a }, TaskType::Once { at: b }) => a == b,
            (
                TaskType::Recurring { every_secs: a, .. },
                TaskType::Recurring { every_secs: b, .. },
            ) => a == b,
            _ => false,
        }
    }
}

impl Task {
    pub fn from_spec(spec: CallbackSpec, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            next_run: spec.task_type.first_run(),
            key: spec.key,
            action: spec.action,
            task_type: spec.task_type,
            created_at: now,
            last_run: None,
            run_count: 0,
        }
    }

    /// Check if this task is due at `now`.
    pub fn should_run(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_run
    }
}

/// Key layout. Everything belonging to a group lives under `group:<id>:`;
/// settings-derived jobs under `group:<id>:jobs:` and session timers under
/// `group:<id>:timer:`. Job keys end in `@<zone>`, so a timezone change
/// yields new keys and a reconcile re-arms every job.
pub mod keys {
    use super::WorkEdge;
    use chrono::Weekday;
    use shiftclaw_core::{BreakKind, GroupId, HourMinute, MemberId};

    pub fn group_jobs(group: GroupId) -> String {
        format!("group:{group}:jobs:")
    }

    pub fn break_timeout(group: GroupId, member: MemberId, kind: BreakKind) -> String {
        format!("group:{group}:timer:break:{member}:{kind}")
    }

    pub fn penalty(group: GroupId, member: MemberId, kind: BreakKind) -> String {
        format!("group:{group}:timer:penalty:{member}:{kind}")
    }

    pub fn greeting(group: GroupId, zone: &str, at: HourMinute) -> String {
        format!("group:{group}:jobs:greeting-{at}@{zone}")
    }

    pub fn work_reminder(
        group: GroupId,
        zone: &str,
        weekday: Weekday,
        edge: WorkEdge,
        at: HourMinute,
    ) -> String {
        format!("group:{group}:jobs:work-{edge}-{weekday}-{at}@{zone}")
    }

    pub fn daily_report(group: GroupId, zone: &str, at: HourMinute) -> String {
        format!("group:{group}:jobs:report-daily-{at}@{zone}")
    }

    pub fn weekly_report(group: GroupId, zone: &str, weekday: Weekday, at: HourMinute) -> String {
        format!("group:{group}:jobs:report-weekly-{weekday}-{at}@{zone}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_group_jobs_prefix_is_not_ambiguous() {
        let at = HourMinute::new(9, 0).unwrap();
        let twelve = keys::greeting(GroupId(12), "UTC", at);
        assert!(!twelve.starts_with(&keys::group_jobs(GroupId(1))));
        assert!(twelve.starts_with(&keys::group_jobs(GroupId(12))));
    }

    #[test]
    fn test_same_job_ignores_first_fire() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let action = TaskAction::DailyReport { group: GroupId(1) };
        let a = CallbackSpec::recurring("k", t0, Duration::days(1), action.clone());
        let b = CallbackSpec::recurring("k", t0 + Duration::hours(3), Duration::days(1), action);
        let task = Task::from_spec(a, t0);
        assert!(b.same_job(&task));
        assert_eq!(task.next_run, t0);
    }
}
