//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Scoring, ranking and audit code call store methods and never execute SQL directly.

use crate::{error::ImpactResult, event::EventLogEntry};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Transaction};

mod audit;
mod disputes;
mod leaderboard;
mod ranking;
mod signals;
mod verification;

pub use signals::NewEntity;
pub use verification::VerificationRow;

pub struct ImpactStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file or shared-memory URI
}

impl ImpactStore {
    pub fn open(path: &str) -> ImpactResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> ImpactResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    /// For file-based databases, this opens the same file.
    pub fn reopen(&self) -> ImpactResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// True when `reopen()` yields a connection to the same data.
    pub fn is_shared(&self) -> bool {
        self.path.is_some()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> ImpactResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_entities_signals.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_rankings.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_leaderboard.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/005_audit.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/006_verification.sql"))?;
        Ok(())
    }

    /// Begin a transaction on the shared connection. Every store call made
    /// before `commit()` joins it; dropping it rolls back.
    pub(crate) fn transaction(&self) -> ImpactResult<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(&self, run_id: &str, version: &str, started_at: NaiveDateTime) -> ImpactResult<()> {
        self.conn.execute(
            "INSERT INTO run (run_id, version, started_at) VALUES (?1, ?2, ?3)",
            params![run_id, version, started_at],
        )?;
        Ok(())
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> ImpactResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, cycle, subsystem, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.run_id,
                entry.cycle as i64,
                entry.subsystem,
                entry.event_type,
                entry.payload,
                entry.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn events_for_cycle(&self, run_id: &str, cycle: u64) -> ImpactResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, cycle, subsystem, event_type, payload, created_at
             FROM event_log WHERE run_id = ?1 AND cycle = ?2
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id, cycle as i64], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    run_id: row.get(1)?,
                    cycle: row.get::<_, i64>(2)? as u64,
                    subsystem: row.get(3)?,
                    event_type: row.get(4)?,
                    payload: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn event_count(&self, run_id: &str, event_type: &str) -> ImpactResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM event_log WHERE run_id = ?1 AND event_type = ?2",
            params![run_id, event_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
