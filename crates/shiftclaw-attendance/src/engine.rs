//! Attendance engine: per-member state machines for check-in, work and breaks.
//!
//! Each (group, member, lane) is either Idle or Active. Every operation on a
//! key runs under that key's async lock, so a check-then-write sequence never
//! interleaves with another operation on the same key. Different keys proceed
//! in parallel.
//!
//! Rejections are typed outcomes; `Err` means the store failed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use shiftclaw_core::{BreakKind, GroupId, MemberId, Result};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::clock::Window;
use crate::models::{BreakSession, CheckInEvent, WorkSession, elapsed_minutes};
use crate::store::SessionStore;

/// Serialization lane of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    CheckIn,
    Work,
    Break(BreakKind),
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lane::CheckIn => write!(f, "checkin"),
            Lane::Work => write!(f, "work"),
            Lane::Break(kind) => write!(f, "break:{kind}"),
        }
    }
}

/// Unit of serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub group: GroupId,
    pub member: MemberId,
    pub lane: Lane,
}

impl SessionKey {
    pub fn new(group: GroupId, member: MemberId, lane: Lane) -> Self {
        Self { group, member, lane }
    }
}

/// One async mutex per key, created on first use and dropped again once the
/// last holder releases it and nobody is waiting.
#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<SessionKey, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<SessionKey, Arc<AsyncMutex<()>>>> {
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait for exclusive access to `key`. Released when the guard drops.
    pub async fn acquire(&self, key: SessionKey) -> KeyGuard<'_> {
        let lock = self.map().entry(key).or_default().clone();
        let guard = lock.clone().lock_owned().await;
        KeyGuard {
            locks: self,
            key,
            lock,
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to one [`SessionKey`].
pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: SessionKey,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.map();
        // Waiters clone the mutex under the map lock, so two references
        // (the map and this guard) means nobody else wants the key.
        let idle = Arc::strong_count(&self.lock) == 2
            && locks.get(&self.key).is_some_and(|l| Arc::ptr_eq(l, &self.lock));
        if idle {
            locks.remove(&self.key);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckInOutcome {
    CheckedIn { event: CheckInEvent },
    AlreadyCheckedIn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkStartOutcome {
    Started { session: WorkSession },
    AlreadyOpen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkStopOutcome {
    Stopped { session: WorkSession, minutes: i64 },
    NoneOpen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BreakStartOutcome {
    Started { session: BreakSession },
    QuotaExceeded { used: u32, max_per_day: u32 },
    AlreadyOpen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BreakStopOutcome {
    Stopped {
        session: BreakSession,
        minutes: i64,
        over_limit: bool,
    },
    NoneOpen,
}

/// Session state machines over a [`SessionStore`].
pub struct AttendanceEngine {
    store: Arc<dyn SessionStore>,
    locks: KeyLocks,
}

impl AttendanceEngine {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            locks: KeyLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Record a check-in unless the member already has one inside `day`.
    pub async fn check_in(
        &self,
        group: GroupId,
        member: MemberId,
        display_name: &str,
        now: DateTime<Utc>,
        day: &Window,
    ) -> Result<CheckInOutcome> {
        let _guard = self.locks.acquire(SessionKey::new(group, member, Lane::CheckIn)).await;

        if self.store.has_checkin_between(group, member, day)? {
            tracing::debug!("Member {member} already checked in today in group {group}");
            return Ok(CheckInOutcome::AlreadyCheckedIn);
        }

        let event = self.store.add_checkin(group, member, display_name, now)?;
        tracing::info!("✅ {display_name} ({member}) checked in to group {group}");
        Ok(CheckInOutcome::CheckedIn { event })
    }

    pub async fn start_work(
        &self,
        group: GroupId,
        member: MemberId,
        now: DateTime<Utc>,
    ) -> Result<WorkStartOutcome> {
        let _guard = self.locks.acquire(SessionKey::new(group, member, Lane::Work)).await;

        if self.store.open_work(group, member)?.is_some() {
            tracing::debug!("Member {member} already at work in group {group}");
            return Ok(WorkStartOutcome::AlreadyOpen);
        }

        let session = self.store.insert_work(group, member, now)?;
        tracing::info!("🏢 Member {member} started work in group {group}");
        Ok(WorkStartOutcome::Started { session })
    }

    pub async fn stop_work(
        &self,
        group: GroupId,
        member: MemberId,
        now: DateTime<Utc>,
    ) -> Result<WorkStopOutcome> {
        let _guard = self.locks.acquire(SessionKey::new(group, member, Lane::Work)).await;

        let Some(open) = self.store.open_work(group, member)? else {
            tracing::debug!("Member {member} has no open work session in group {group}");
            return Ok(WorkStopOutcome::NoneOpen);
        };

        let session = self.store.close_work(open.id, now)?;
        let minutes = elapsed_minutes(session.start, now);
        tracing::info!("🏁 Member {member} stopped work in group {group} after {minutes} min");
        Ok(WorkStopOutcome::Stopped { session, minutes })
    }

    /// Open a break of `kind`. The daily quota is checked before the
    /// open-session check, so a member at quota with a break still open gets
    /// `QuotaExceeded`.
    pub async fn start_break(
        &self,
        group: GroupId,
        member: MemberId,
        kind: BreakKind,
        now: DateTime<Utc>,
        day: &Window,
        max_per_day: u32,
    ) -> Result<BreakStartOutcome> {
        let _guard = self
            .locks
            .acquire(SessionKey::new(group, member, Lane::Break(kind)))
            .await;

        let used = self.store.count_breaks_started(group, member, kind, day)?;
        if used >= max_per_day {
            tracing::info!("🚫 Member {member} reached {kind} quota ({used}/{max_per_day}) in group {group}");
            return Ok(BreakStartOutcome::QuotaExceeded { used, max_per_day });
        }

        if self.store.open_break(group, member, kind)?.is_some() {
            tracing::debug!("Member {member} already on a {kind} break in group {group}");
            return Ok(BreakStartOutcome::AlreadyOpen);
        }

        let session = self.store.insert_break(group, member, kind, now)?;
        tracing::info!("☕ Member {member} started {kind} break ({}/{max_per_day}) in group {group}", used + 1);
        Ok(BreakStartOutcome::Started { session })
    }

    /// Close the open break of `kind`. Over-limit is reported, not enforced.
    pub async fn stop_break(
        &self,
        group: GroupId,
        member: MemberId,
        kind: BreakKind,
        now: DateTime<Utc>,
        limit_minutes: u32,
    ) -> Result<BreakStopOutcome> {
        let _guard = self
            .locks
            .acquire(SessionKey::new(group, member, Lane::Break(kind)))
            .await;

        let Some(open) = self.store.open_break(group, member, kind)? else {
            tracing::debug!("Member {member} has no open {kind} break in group {group}");
            return Ok(BreakStopOutcome::NoneOpen);
        };

        let session = self.store.close_break(open.id, now)?;
        let minutes = elapsed_minutes(session.start, now);
        let over_limit = minutes > i64::from(limit_minutes);
        if over_limit {
            tracing::info!("⏰ Member {member} back from {kind} after {minutes} min (limit {limit_minutes})");
        } else {
            tracing::info!("👋 Member {member} back from {kind} after {minutes} min");
        }
        Ok(BreakStopOutcome::Stopped {
            session,
            minutes,
            over_limit,
        })
    }
}
