//! SQLite-backed session and settings store.
//!
//! Instants are stored as unix seconds so window scans are plain range
//! queries. Partial unique indexes back the one-open-session invariants.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use shiftclaw_core::{BreakKind, GroupId, MemberId, Result, ShiftClawError};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{SessionStore, SettingsStore};
use crate::clock::Window;
use crate::models::{BreakSession, CheckInEvent, GroupSettings, WorkSession};

/// Attendance database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> ShiftClawError {
    ShiftClawError::Database(e.to_string())
}

fn ts(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

fn parse_kind(idx: usize, raw: String) -> rusqlite::Result<BreakKind> {
    raw.parse().map_err(|e: ShiftClawError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn checkin_from_row(row: &Row<'_>) -> rusqlite::Result<CheckInEvent> {
    Ok(CheckInEvent {
        id: row.get(0)?,
        group: GroupId(row.get(1)?),
        member: MemberId(row.get(2)?),
        display_name: row.get(3)?,
        at: from_ts(row.get(4)?),
    })
}

fn work_from_row(row: &Row<'_>) -> rusqlite::Result<WorkSession> {
    Ok(WorkSession {
        id: row.get(0)?,
        group: GroupId(row.get(1)?),
        member: MemberId(row.get(2)?),
        start: from_ts(row.get(3)?),
        end: row.get::<_, Option<i64>>(4)?.map(from_ts),
    })
}

fn break_from_row(row: &Row<'_>) -> rusqlite::Result<BreakSession> {
    Ok(BreakSession {
        id: row.get(0)?,
        group: GroupId(row.get(1)?),
        member: MemberId(row.get(2)?),
        kind: parse_kind(3, row.get(3)?)?,
        start: from_ts(row.get(4)?),
        end: row.get::<_, Option<i64>>(5)?.map(from_ts),
    })
}

const CHECKIN_COLS: &str = "id, group_id, member_id, display_name, ts";
const WORK_COLS: &str = "id, group_id, member_id, start_ts, end_ts";
const BREAK_COLS: &str = "id, group_id, member_id, kind, start_ts, end_ts";

impl SqliteStore {
    /// Open or create the attendance database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| ShiftClawError::Database(format!("DB open: {e}")))?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// Fresh in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ShiftClawError::Database(format!("Lock: {e}")))
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS group_settings (
                group_id      INTEGER PRIMARY KEY,
                timezone      TEXT NOT NULL,
                language      TEXT NOT NULL,
                work_schedule TEXT,              -- JSON WorkSchedule
                report_time   TEXT,              -- HH:MM
                greeting_time TEXT               -- HH:MM
            );

            CREATE TABLE IF NOT EXISTS checkins (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                group_id     INTEGER NOT NULL,
                member_id    INTEGER NOT NULL,
                display_name TEXT NOT NULL,
                ts           INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS work_sessions (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                group_id  INTEGER NOT NULL,
                member_id INTEGER NOT NULL,
                start_ts  INTEGER NOT NULL,
                end_ts    INTEGER
            );

            CREATE TABLE IF NOT EXISTS breaks (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                group_id  INTEGER NOT NULL,
                member_id INTEGER NOT NULL,
                kind      TEXT NOT NULL,         -- 'smoke' | 'toilet' | 'takeout'
                start_ts  INTEGER NOT NULL,
                end_ts    INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_checkins_group_ts ON checkins(group_id, ts);
            CREATE INDEX IF NOT EXISTS idx_checkins_member_ts ON checkins(group_id, member_id, ts);
            CREATE INDEX IF NOT EXISTS idx_work_group_start ON work_sessions(group_id, start_ts);
            CREATE INDEX IF NOT EXISTS idx_breaks_group_kind_start ON breaks(group_id, member_id, kind, start_ts);

            -- One open session per key
            CREATE UNIQUE INDEX IF NOT EXISTS uq_work_open
                ON work_sessions(group_id, member_id) WHERE end_ts IS NULL;
            CREATE UNIQUE INDEX IF NOT EXISTS uq_break_open
                ON breaks(group_id, member_id, kind) WHERE end_ts IS NULL;
            ",
        )
        .map_err(|e| ShiftClawError::Database(format!("Migration: {e}")))?;
        Ok(())
    }

    fn query_checkins(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<CheckInEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt.query_map(params, checkin_from_row).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn query_work(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<WorkSession>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt.query_map(params, work_from_row).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn query_breaks(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<BreakSession>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt.query_map(params, break_from_row).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn get_work(conn: &Connection, id: i64) -> Result<WorkSession> {
        conn.query_row(
            &format!("SELECT {WORK_COLS} FROM work_sessions WHERE id = ?1"),
            [id],
            work_from_row,
        )
        .map_err(db_err)
    }

    fn get_break(conn: &Connection, id: i64) -> Result<BreakSession> {
        conn.query_row(
            &format!("SELECT {BREAK_COLS} FROM breaks WHERE id = ?1"),
            [id],
            break_from_row,
        )
        .map_err(db_err)
    }
}

impl SessionStore for SqliteStore {
    fn add_checkin(
        &self,
        group: GroupId,
        member: MemberId,
        display_name: &str,
        at: DateTime<Utc>,
    ) -> Result<CheckInEvent> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO checkins (group_id, member_id, display_name, ts) VALUES (?1, ?2, ?3, ?4)",
            params![group.0, member.0, display_name, ts(at)],
        )
        .map_err(db_err)?;
        Ok(CheckInEvent {
            id: conn.last_insert_rowid(),
            group,
            member,
            display_name: display_name.to_string(),
            at: from_ts(ts(at)),
        })
    }

    fn has_checkin_between(&self, group: GroupId, member: MemberId, window: &Window) -> Result<bool> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT 1 FROM checkins WHERE group_id = ?1 AND member_id = ?2 AND ts >= ?3 AND ts < ?4 LIMIT 1",
            params![group.0, member.0, ts(window.start), ts(window.end_exclusive())],
            |_| Ok(()),
        )
        .optional()
        .map(|r| r.is_some())
        .map_err(db_err)
    }

    fn checkins_between(&self, group: GroupId, window: &Window) -> Result<Vec<CheckInEvent>> {
        self.query_checkins(
            &format!(
                "SELECT {CHECKIN_COLS} FROM checkins
                 WHERE group_id = ?1 AND ts >= ?2 AND ts < ?3 ORDER BY id"
            ),
            params![group.0, ts(window.start), ts(window.end_exclusive())],
        )
    }

    fn checkins_since(&self, group: GroupId, since: Option<DateTime<Utc>>) -> Result<Vec<CheckInEvent>> {
        self.query_checkins(
            &format!(
                "SELECT {CHECKIN_COLS} FROM checkins
                 WHERE group_id = ?1 AND ts >= ?2 ORDER BY id"
            ),
            params![group.0, since.map(ts).unwrap_or(i64::MIN)],
        )
    }

    fn member_checkins(&self, group: GroupId, member: MemberId) -> Result<Vec<CheckInEvent>> {
        self.query_checkins(
            &format!(
                "SELECT {CHECKIN_COLS} FROM checkins
                 WHERE group_id = ?1 AND member_id = ?2 ORDER BY ts, id"
            ),
            params![group.0, member.0],
        )
    }

    fn latest_display_name(&self, group: GroupId, member: MemberId) -> Result<Option<String>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT display_name FROM checkins WHERE group_id = ?1 AND member_id = ?2
             ORDER BY ts DESC, id DESC LIMIT 1",
            params![group.0, member.0],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(db_err)
    }

    fn open_work(&self, group: GroupId, member: MemberId) -> Result<Option<WorkSession>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {WORK_COLS} FROM work_sessions
                 WHERE group_id = ?1 AND member_id = ?2 AND end_ts IS NULL
                 ORDER BY id DESC LIMIT 1"
            ),
            params![group.0, member.0],
            work_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    fn insert_work(&self, group: GroupId, member: MemberId, start: DateTime<Utc>) -> Result<WorkSession> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO work_sessions (group_id, member_id, start_ts) VALUES (?1, ?2, ?3)",
            params![group.0, member.0, ts(start)],
        )
        .map_err(db_err)?;
        Self::get_work(&conn, conn.last_insert_rowid())
    }

    fn close_work(&self, id: i64, end: DateTime<Utc>) -> Result<WorkSession> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE work_sessions SET end_ts = ?1 WHERE id = ?2 AND end_ts IS NULL",
                params![ts(end), id],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(ShiftClawError::Database(format!("work session {id} is not open")));
        }
        Self::get_work(&conn, id)
    }

    fn work_overlapping(&self, group: GroupId, window: &Window) -> Result<Vec<WorkSession>> {
        self.query_work(
            &format!(
                "SELECT {WORK_COLS} FROM work_sessions
                 WHERE group_id = ?1 AND start_ts < ?3 AND (end_ts IS NULL OR end_ts >= ?2)
                 ORDER BY id"
            ),
            params![group.0, ts(window.start), ts(window.end_exclusive())],
        )
    }

    fn open_break(&self, group: GroupId, member: MemberId, kind: BreakKind) -> Result<Option<BreakSession>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {BREAK_COLS} FROM breaks
                 WHERE group_id = ?1 AND member_id = ?2 AND kind = ?3 AND end_ts IS NULL
                 ORDER BY id DESC LIMIT 1"
            ),
            params![group.0, member.0, kind.as_str()],
            break_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    fn all_open_breaks(&self) -> Result<Vec<BreakSession>> {
        self.query_breaks(
            &format!("SELECT {BREAK_COLS} FROM breaks WHERE end_ts IS NULL ORDER BY id"),
            [],
        )
    }

    fn insert_break(
        &self,
        group: GroupId,
        member: MemberId,
        kind: BreakKind,
        start: DateTime<Utc>,
    ) -> Result<BreakSession> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO breaks (group_id, member_id, kind, start_ts) VALUES (?1, ?2, ?3, ?4)",
            params![group.0, member.0, kind.as_str(), ts(start)],
        )
        .map_err(db_err)?;
        Self::get_break(&conn, conn.last_insert_rowid())
    }

    fn close_break(&self, id: i64, end: DateTime<Utc>) -> Result<BreakSession> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE breaks SET end_ts = ?1 WHERE id = ?2 AND end_ts IS NULL",
                params![ts(end), id],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(ShiftClawError::Database(format!("break {id} is not open")));
        }
        Self::get_break(&conn, id)
    }

    fn count_breaks_started(
        &self,
        group: GroupId,
        member: MemberId,
        kind: BreakKind,
        window: &Window,
    ) -> Result<u32> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT COUNT(*) FROM breaks
             WHERE group_id = ?1 AND member_id = ?2 AND kind = ?3 AND start_ts >= ?4 AND start_ts < ?5",
            params![group.0, member.0, kind.as_str(), ts(window.start), ts(window.end_exclusive())],
            |row| row.get::<_, u32>(0),
        )
        .map_err(db_err)
    }

    fn breaks_overlapping(&self, group: GroupId, window: &Window) -> Result<Vec<BreakSession>> {
        self.query_breaks(
            &format!(
                "SELECT {BREAK_COLS} FROM breaks
                 WHERE group_id = ?1 AND start_ts < ?3 AND (end_ts IS NULL OR end_ts >= ?2)
                 ORDER BY id"
            ),
            params![group.0, ts(window.start), ts(window.end_exclusive())],
        )
    }
}

impl SettingsStore for SqliteStore {
    fn group_settings(&self, group: GroupId) -> Result<Option<GroupSettings>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT timezone, language, work_schedule, report_time, greeting_time
                 FROM group_settings WHERE group_id = ?1",
                [group.0],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?;

        let Some((timezone, language, schedule, report, greeting)) = row else {
            return Ok(None);
        };

        Ok(Some(GroupSettings {
            group,
            timezone,
            language,
            work_schedule: schedule.map(|s| serde_json::from_str(&s)).transpose()?,
            report_time: report.map(|s| s.parse()).transpose()?,
            greeting_time: greeting.map(|s| s.parse()).transpose()?,
        }))
    }

    fn put_group_settings(&self, settings: &GroupSettings) -> Result<()> {
        let schedule = settings
            .work_schedule
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO group_settings (group_id, timezone, language, work_schedule, report_time, greeting_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(group_id) DO UPDATE SET
                timezone = excluded.timezone,
                language = excluded.language,
                work_schedule = excluded.work_schedule,
                report_time = excluded.report_time,
                greeting_time = excluded.greeting_time",
            params![
                settings.group.0,
                settings.timezone,
                settings.language,
                schedule,
                settings.report_time.map(|t| t.to_string()),
                settings.greeting_time.map(|t| t.to_string()),
            ],
        )
        .map_err(db_err)?;
        tracing::debug!("💾 Saved settings for group {}", settings.group);
        Ok(())
    }

    fn known_groups(&self) -> Result<Vec<GroupId>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT group_id FROM group_settings ORDER BY group_id")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, i64>(0).map(GroupId))
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }
}
