//! SQLite-backed history sink — append-only log of status transitions.
//!
//! Writes run on the blocking pool; a write that has started always runs to
//! completion even if the caller is cancelled.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use jobwatch_core::error::{JobWatchError, Result};
use jobwatch_core::traits::HistorySink;
use jobwatch_core::types::{JobStatus, StatusChangeEvent};

/// Upper bound on rows returned by [`HistorySink::recent`].
pub const MAX_RECENT: usize = 1000;

pub struct SqliteHistory {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistory {
    /// Open or create the history database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| JobWatchError::History(format!("DB open: {e}")))?;
        // WAL keeps readers from blocking the poller's appends.
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::with_connection(conn)
    }

    /// In-memory database (tests, `--once`).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| JobWatchError::History(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| JobWatchError::History(format!("Lock: {e}")))?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS job_status_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                job_name TEXT NOT NULL,
                old_status TEXT,
                new_status TEXT NOT NULL,
                workstation TEXT,
                timestamp TEXT NOT NULL,
                duration REAL,          -- seconds
                error_message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_history_job_name ON job_status_history(job_name);
            CREATE INDEX IF NOT EXISTS idx_history_timestamp ON job_status_history(timestamp);
            ",
        )
        .map_err(|e| JobWatchError::History(format!("Migration: {e}")))?;
        Ok(())
    }

    /// Total rows stored.
    pub fn count(&self) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| JobWatchError::History(format!("Lock: {e}")))?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM job_status_history", [], |row| row.get(0))
            .map_err(|e| JobWatchError::History(format!("Count: {e}")))?;
        Ok(n as usize)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| JobWatchError::History(format!("Lock: {e}")))?;
            f(&conn)
        })
        .await
        .map_err(|e| JobWatchError::History(format!("Join: {e}")))?
    }
}

fn insert(conn: &Connection, event: &StatusChangeEvent) -> Result<()> {
    conn.execute(
        "INSERT INTO job_status_history
         (job_id, job_name, old_status, new_status, workstation, timestamp, duration, error_message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            event.job_id,
            event.job_name,
            event.old_status.raw(),
            event.new_status.raw(),
            event.workstation,
            event.timestamp.to_rfc3339(),
            event.duration,
            event.error_message,
        ],
    )
    .map_err(|e| JobWatchError::History(format!("Insert: {e}")))?;
    Ok(())
}

fn select_recent(conn: &Connection, job_name: Option<&str>, limit: usize) -> Result<Vec<StatusChangeEvent>> {
    let limit = limit.min(MAX_RECENT) as i64;
    let mut stmt = conn
        .prepare(
            "SELECT job_id, job_name, old_status, new_status, workstation, timestamp, duration, error_message
             FROM job_status_history
             WHERE ?1 IS NULL OR job_name = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )
        .map_err(|e| JobWatchError::History(format!("Prepare: {e}")))?;

    let rows = stmt
        .query_map(params![job_name, limit], |row| {
            let old_status: Option<String> = row.get(2)?;
            let new_status: String = row.get(3)?;
            let raw_ts: String = row.get(5)?;
            let timestamp = DateTime::parse_from_rfc3339(&raw_ts)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
                })?;
            Ok(StatusChangeEvent {
                job_id: row.get(0)?,
                job_name: row.get(1)?,
                old_status: old_status
                    .map(JobStatus::new)
                    .unwrap_or_else(JobStatus::new_sentinel),
                new_status: JobStatus::new(new_status),
                workstation: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                timestamp,
                duration: row.get(6)?,
                error_message: row.get(7)?,
            })
        })
        .map_err(|e| JobWatchError::History(format!("Query: {e}")))?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| JobWatchError::History(format!("Row: {e}")))
}

#[async_trait]
impl HistorySink for SqliteHistory {
    async fn append(&self, event: &StatusChangeEvent) -> Result<()> {
        let event = event.clone();
        self.blocking(move |conn| insert(conn, &event)).await
    }

    async fn recent(&self, job_name: Option<&str>, limit: usize) -> Result<Vec<StatusChangeEvent>> {
        let job_name = job_name.map(str::to_string);
        self.blocking(move |conn| select_recent(conn, job_name.as_deref(), limit))
            .await
    }
}
