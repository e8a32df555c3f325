//! Data-access seams for sessions and group settings.
//!
//! The store is the source of truth. Implementations must keep at most one
//! open work session per (group, member) and one open break per
//! (group, member, kind), and return scans ordered by id.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use shiftclaw_core::{BreakKind, GroupId, MemberId, Result};

use crate::clock::Window;
use crate::models::{BreakSession, CheckInEvent, GroupSettings, WorkSession};

/// Check-ins, work sessions and breaks.
pub trait SessionStore: Send + Sync {
    fn add_checkin(
        &self,
        group: GroupId,
        member: MemberId,
        display_name: &str,
        at: DateTime<Utc>,
    ) -> Result<CheckInEvent>;

    fn has_checkin_between(&self, group: GroupId, member: MemberId, window: &Window) -> Result<bool>;

    /// Check-ins with a timestamp inside the window.
    fn checkins_between(&self, group: GroupId, window: &Window) -> Result<Vec<CheckInEvent>>;

    /// Check-ins at or after `since`, or all of them.
    fn checkins_since(&self, group: GroupId, since: Option<DateTime<Utc>>) -> Result<Vec<CheckInEvent>>;

    fn member_checkins(&self, group: GroupId, member: MemberId) -> Result<Vec<CheckInEvent>>;

    /// Display name of the member's most recent check-in.
    fn latest_display_name(&self, group: GroupId, member: MemberId) -> Result<Option<String>>;

    fn open_work(&self, group: GroupId, member: MemberId) -> Result<Option<WorkSession>>;

    fn insert_work(&self, group: GroupId, member: MemberId, start: DateTime<Utc>) -> Result<WorkSession>;

    fn close_work(&self, id: i64, end: DateTime<Utc>) -> Result<WorkSession>;

    /// Work sessions overlapping the window; open sessions count as ongoing.
    fn work_overlapping(&self, group: GroupId, window: &Window) -> Result<Vec<WorkSession>>;

    fn open_break(&self, group: GroupId, member: MemberId, kind: BreakKind) -> Result<Option<BreakSession>>;

    /// Open breaks across every group.
    fn all_open_breaks(&self) -> Result<Vec<BreakSession>>;

    fn insert_break(
        &self,
        group: GroupId,
        member: MemberId,
        kind: BreakKind,
        start: DateTime<Utc>,
    ) -> Result<BreakSession>;

    fn close_break(&self, id: i64, end: DateTime<Utc>) -> Result<BreakSession>;

    /// Breaks of `kind` whose start lies inside the window, open or closed.
    fn count_breaks_started(
        &self,
        group: GroupId,
        member: MemberId,
        kind: BreakKind,
        window: &Window,
    ) -> Result<u32>;

    /// Breaks overlapping the window; open breaks count as ongoing.
    fn breaks_overlapping(&self, group: GroupId, window: &Window) -> Result<Vec<BreakSession>>;
}

/// Mutable per-group settings.
pub trait SettingsStore: Send + Sync {
    fn group_settings(&self, group: GroupId) -> Result<Option<GroupSettings>>;

    fn put_group_settings(&self, settings: &GroupSettings) -> Result<()>;

    /// Every group that has stored settings.
    fn known_groups(&self) -> Result<Vec<GroupId>>;
}
