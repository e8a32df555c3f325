//! # ShiftClaw Attendance
//!
//! Check-ins, work shifts and timed breaks for group chats, with per-day
//! quotas, timezone-aware windows and digest reports.
//!
//! ## Architecture
//! ```text
//! Attendance (service facade)
//!   ├── AttendanceEngine   per-key locked state machines (check-in, work, break kind)
//!   ├── Aggregator         window summaries, member table, leaderboard
//!   ├── SessionStore       SqliteStore | MemoryStore
//!   ├── SettingsStore      per-group timezone, language, schedule, report/greeting time
//!   └── SharedScheduler    break timeouts, penalty ends, group jobs
//!
//! JobRunner (TaskHandler): fired task → live re-check → Notification → NotifySink
//! ```

pub mod aggregate;
pub mod clock;
pub mod engine;
pub mod jobs;
pub mod models;
pub mod reports;
pub mod service;
pub mod store;

pub use aggregate::{Aggregator, KindTotals, MemberRow, MemberStats, RankedMember, WindowSummary};
pub use clock::{Window, ZoneResolution, day_bounds, next_occurrence, resolve_timezone, week_bounds};
pub use engine::{
    AttendanceEngine, BreakStartOutcome, BreakStopOutcome, CheckInOutcome, KeyGuard, KeyLocks, Lane,
    SessionKey, WorkStartOutcome, WorkStopOutcome,
};
pub use jobs::{JobRunner, desired_callbacks};
pub use models::{BreakSession, CheckInEvent, GroupSettings, WorkSession};
pub use reports::{CompactDigest, DailyReport, DaySummary, WeeklyReport};
pub use service::{
    Actor, Attendance, BreakStopReply, OverdueBreak, Reply, RestoreReport, SettingsOutcome,
    SUPPORTED_LANGUAGES,
};
pub use store::{MemoryStore, SessionStore, SettingsStore, SqliteStore};
