//! In-memory store: append-only arenas plus indexes of the open sessions.

use chrono::{DateTime, Utc};
use shiftclaw_core::{BreakKind, GroupId, MemberId, Result, ShiftClawError};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{SessionStore, SettingsStore};
use crate::clock::Window;
use crate::models::{BreakSession, CheckInEvent, GroupSettings, WorkSession};

#[derive(Default)]
struct Inner {
    next_id: i64,
    checkins: Vec<CheckInEvent>,
    work: Vec<WorkSession>,
    breaks: Vec<BreakSession>,
    /// (group, member) -> index into `work`.
    open_work: HashMap<(GroupId, MemberId), usize>,
    /// (group, member, kind) -> index into `breaks`.
    open_breaks: HashMap<(GroupId, MemberId, BreakKind), usize>,
    settings: BTreeMap<GroupId, GroupSettings>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Volatile store for tests and single-process runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| ShiftClawError::Database(format!("Lock: {e}")))
    }
}

impl SessionStore for MemoryStore {
    fn add_checkin(
        &self,
        group: GroupId,
        member: MemberId,
        display_name: &str,
        at: DateTime<Utc>,
    ) -> Result<CheckInEvent> {
        let mut inner = self.inner()?;
        let event = CheckInEvent {
            id: inner.next_id(),
            group,
            member,
            display_name: display_name.to_string(),
            at,
        };
        inner.checkins.push(event.clone());
        Ok(event)
    }

    fn has_checkin_between(&self, group: GroupId, member: MemberId, window: &Window) -> Result<bool> {
        Ok(self
            .inner()?
            .checkins
            .iter()
            .any(|c| c.group == group && c.member == member && window.contains(c.at)))
    }

    fn checkins_between(&self, group: GroupId, window: &Window) -> Result<Vec<CheckInEvent>> {
        Ok(self
            .inner()?
            .checkins
            .iter()
            .filter(|c| c.group == group && window.contains(c.at))
            .cloned()
            .collect())
    }

    fn checkins_since(&self, group: GroupId, since: Option<DateTime<Utc>>) -> Result<Vec<CheckInEvent>> {
        Ok(self
            .inner()?
            .checkins
            .iter()
            .filter(|c| c.group == group && since.is_none_or(|s| c.at >= s))
            .cloned()
            .collect())
    }

    fn member_checkins(&self, group: GroupId, member: MemberId) -> Result<Vec<CheckInEvent>> {
        let mut events: Vec<CheckInEvent> = self
            .inner()?
            .checkins
            .iter()
            .filter(|c| c.group == group && c.member == member)
            .cloned()
            .collect();
        events.sort_by_key(|c| (c.at, c.id));
        Ok(events)
    }

    fn latest_display_name(&self, group: GroupId, member: MemberId) -> Result<Option<String>> {
        Ok(self
            .inner()?
            .checkins
            .iter()
            .filter(|c| c.group == group && c.member == member)
            .max_by_key(|c| (c.at, c.id))
            .map(|c| c.display_name.clone()))
    }

    fn open_work(&self, group: GroupId, member: MemberId) -> Result<Option<WorkSession>> {
        let inner = self.inner()?;
        Ok(inner
            .open_work
            .get(&(group, member))
            .map(|&idx| inner.work[idx].clone()))
    }

    fn insert_work(&self, group: GroupId, member: MemberId, start: DateTime<Utc>) -> Result<WorkSession> {
        let mut inner = self.inner()?;
        if inner.open_work.contains_key(&(group, member)) {
            return Err(ShiftClawError::Database(format!(
                "member {member} already has an open work session in group {group}"
            )));
        }
        let session = WorkSession {
            id: inner.next_id(),
            group,
            member,
            start,
            end: None,
        };
        let idx = inner.work.len();
        inner.work.push(session.clone());
        inner.open_work.insert((group, member), idx);
        Ok(session)
    }

    fn close_work(&self, id: i64, end: DateTime<Utc>) -> Result<WorkSession> {
        let mut inner = self.inner()?;
        let idx = inner
            .work
            .iter()
            .position(|w| w.id == id && w.is_open())
            .ok_or_else(|| ShiftClawError::Database(format!("work session {id} is not open")))?;
        let key = (inner.work[idx].group, inner.work[idx].member);
        inner.work[idx].end = Some(end);
        inner.open_work.remove(&key);
        Ok(inner.work[idx].clone())
    }

    fn work_overlapping(&self, group: GroupId, window: &Window) -> Result<Vec<WorkSession>> {
        Ok(self
            .inner()?
            .work
            .iter()
            .filter(|w| w.group == group && window.overlaps(w.start, w.end))
            .cloned()
            .collect())
    }

    fn open_break(&self, group: GroupId, member: MemberId, kind: BreakKind) -> Result<Option<BreakSession>> {
        let inner = self.inner()?;
        Ok(inner
            .open_breaks
            .get(&(group, member, kind))
            .map(|&idx| inner.breaks[idx].clone()))
    }

    fn all_open_breaks(&self) -> Result<Vec<BreakSession>> {
        let inner = self.inner()?;
        let mut open: Vec<BreakSession> = inner
            .open_breaks
            .values()
            .map(|&idx| inner.breaks[idx].clone())
            .collect();
        open.sort_by_key(|b| b.id);
        Ok(open)
    }

    fn insert_break(
        &self,
        group: GroupId,
        member: MemberId,
        kind: BreakKind,
        start: DateTime<Utc>,
    ) -> Result<BreakSession> {
        let mut inner = self.inner()?;
        if inner.open_breaks.contains_key(&(group, member, kind)) {
            return Err(ShiftClawError::Database(format!(
                "member {member} already has an open {kind} break in group {group}"
            )));
        }
        let session = BreakSession {
            id: inner.next_id(),
            group,
            member,
            kind,
            start,
            end: None,
        };
        let idx = inner.breaks.len();
        inner.breaks.push(session.clone());
        inner.open_breaks.insert((group, member, kind), idx);
        Ok(session)
    }

    fn close_break(&self, id: i64, end: DateTime<Utc>) -> Result<BreakSession> {
        let mut inner = self.inner()?;
        let idx = inner
            .breaks
            .iter()
            .position(|b| b.id == id && b.is_open())
            .ok_or_else(|| ShiftClawError::Database(format!("break {id} is not open")))?;
        let key = (inner.breaks[idx].group, inner.breaks[idx].member, inner.breaks[idx].kind);
        inner.breaks[idx].end = Some(end);
        inner.open_breaks.remove(&key);
        Ok(inner.breaks[idx].clone())
    }

    fn count_breaks_started(
        &self,
        group: GroupId,
        member: MemberId,
        kind: BreakKind,
        window: &Window,
    ) -> Result<u32> {
        let count = self
            .inner()?
            .breaks
            .iter()
            .filter(|b| b.group == group && b.member == member && b.kind == kind && window.contains(b.start))
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    fn breaks_overlapping(&self, group: GroupId, window: &Window) -> Result<Vec<BreakSession>> {
        Ok(self
            .inner()?
            .breaks
            .iter()
            .filter(|b| b.group == group && window.overlaps(b.start, b.end))
            .cloned()
            .collect())
    }
}

impl SettingsStore for MemoryStore {
    fn group_settings(&self, group: GroupId) -> Result<Option<GroupSettings>> {
        Ok(self.inner()?.settings.get(&group).cloned())
    }

    fn put_group_settings(&self, settings: &GroupSettings) -> Result<()> {
        self.inner()?.settings.insert(settings.group, settings.clone());
        Ok(())
    }

    fn known_groups(&self) -> Result<Vec<GroupId>> {
        Ok(self.inner()?.settings.keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    const G: GroupId = GroupId(1);
    const M: MemberId = MemberId(2);

    #[test]
    fn test_open_index_tracks_close() {
        let store = MemoryStore::new();
        let b = store.insert_break(G, M, BreakKind::Smoke, t(10, 0)).unwrap();
        assert!(store.insert_break(G, M, BreakKind::Smoke, t(10, 1)).is_err());
        assert!(store.insert_break(G, M, BreakKind::Toilet, t(10, 1)).is_ok());

        store.close_break(b.id, t(10, 5)).unwrap();
        assert!(store.open_break(G, M, BreakKind::Smoke).unwrap().is_none());
        assert_eq!(store.all_open_breaks().unwrap().len(), 1);
        assert!(store.insert_break(G, M, BreakKind::Smoke, t(10, 6)).is_ok());
    }

    #[test]
    fn test_ids_are_unique_across_tables() {
        let store = MemoryStore::new();
        let c = store.add_checkin(G, M, "a", t(8, 0)).unwrap();
        let w = store.insert_work(G, M, t(8, 0)).unwrap();
        assert_ne!(c.id, w.id);
        let closed = store.close_work(w.id, t(9, 0)).unwrap();
        assert_eq!(closed.end, Some(t(9, 0)));
        assert!(store.close_work(w.id, t(9, 30)).is_err());
    }

    #[test]
    fn test_latest_display_name() {
        let store = MemoryStore::new();
        assert!(store.latest_display_name(G, M).unwrap().is_none());
        store.add_checkin(G, M, "first", t(8, 0)).unwrap();
        store.add_checkin(G, M, "second", t(9, 0)).unwrap();
        assert_eq!(store.latest_display_name(G, M).unwrap().as_deref(), Some("second"));
    }
}
