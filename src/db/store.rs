//! SQLite database store implementation.

use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use super::models::*;
use super::{apply_change, EventStore, LogStore, StatusStore};

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Malformed document: {0}")]
    Malformed(String),
    #[error("Duplicate key: {0}")]
    Duplicate(String),
    #[error("Not found")]
    NotFound,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initialize the database schema.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn();

        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;

        Ok(())
    }

    // --- Statuses ---

    /// Number of stored statuses.
    pub fn count_statuses(&self) -> Result<i64, DbError> {
        let conn = self.conn();
        Ok(conn.query_row("SELECT COUNT(*) FROM statuses", [], |r| r.get(0))?)
    }
}

fn decode_status(doc: &str) -> Result<StatusRecord, DbError> {
    serde_json::from_str(doc).map_err(|e| DbError::Malformed(e.to_string()))
}

fn decode_event(doc: &str) -> Result<Event, DbError> {
    serde_json::from_str(doc).map_err(|e| DbError::Malformed(e.to_string()))
}

impl StatusStore for Store {
    fn get_status(&self, entity_id: &str) -> Result<Option<StatusRecord>, DbError> {
        let conn = self.conn();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM statuses WHERE entity_id = ?1",
                params![entity_id],
                |row| row.get(0),
            )
            .optional()?;

        doc.map(|d| decode_status(&d)).transpose()
    }

    fn put_status(&self, entity_id: &str, status: &StatusRecord) -> Result<(), DbError> {
        let doc = serde_json::to_string(status)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO statuses (entity_id, value, stealthy_time, oldest_flap, doc)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(entity_id) DO UPDATE SET
             value=excluded.value, stealthy_time=excluded.stealthy_time,
             oldest_flap=excluded.oldest_flap, doc=excluded.doc",
            params![
                entity_id,
                status.value.code(),
                status.stealthy_time,
                status.oldest_flap(),
                doc,
            ],
        )?;
        Ok(())
    }

    fn find_expired_statuses(
        &self,
        stealthy_before: i64,
        flapping_before: i64,
    ) -> Result<Vec<(String, StatusRecord)>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT entity_id, doc FROM statuses
             WHERE (value = ?1 AND stealthy_time < ?2)
                OR (value = ?3 AND oldest_flap < ?4)
             ORDER BY entity_id ASC",
        )?;

        let rows = stmt
            .query_map(
                params![
                    StatusValue::Stealthy.code(),
                    stealthy_before,
                    StatusValue::Flapping.code(),
                    flapping_before,
                ],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, doc)| Ok((id, decode_status(&doc)?)))
            .collect()
    }
}

impl EventStore for Store {
    fn get_event(&self, routing_key: &str) -> Result<Option<Event>, DbError> {
        let conn = self.conn();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM events WHERE routing_key = ?1",
                params![routing_key],
                |row| row.get(0),
            )
            .optional()?;

        doc.map(|d| decode_event(&d)).transpose()
    }

    fn put_event(&self, routing_key: &str, event: &Event) -> Result<(), DbError> {
        let doc = serde_json::to_string(event)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO events (routing_key, doc) VALUES (?1, ?2)
             ON CONFLICT(routing_key) DO UPDATE SET doc=excluded.doc",
            params![routing_key, doc],
        )?;
        Ok(())
    }

    fn update_event(&self, routing_key: &str, change: &Map<String, Value>) -> Result<(), DbError> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;

        let doc: String = tx
            .query_row(
                "SELECT doc FROM events WHERE routing_key = ?1",
                params![routing_key],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(DbError::NotFound)?;

        let updated = apply_change(&decode_event(&doc)?, change)?;
        tx.execute(
            "UPDATE events SET doc = ?1 WHERE routing_key = ?2",
            params![serde_json::to_string(&updated)?, routing_key],
        )?;

        tx.commit()?;
        Ok(())
    }
}

impl LogStore for Store {
    fn append_log(&self, entry: &LogEntry) -> Result<(), DbError> {
        let doc = serde_json::to_string(&entry.event)?;
        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO events_log (id, routing_key, timestamp, doc) VALUES (?1, ?2, ?3, ?4)",
            params![entry.id, entry.routing_key, entry.timestamp, doc],
        )?;
        if inserted == 0 {
            return Err(DbError::Duplicate(entry.id.clone()));
        }
        Ok(())
    }

    fn get_log(&self, routing_key: &str) -> Result<Vec<LogEntry>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, doc FROM events_log
             WHERE routing_key = ?1 ORDER BY timestamp ASC",
        )?;

        let rows = stmt
            .query_map(params![routing_key], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, timestamp, doc)| {
                Ok(LogEntry {
                    id,
                    routing_key: routing_key.to_string(),
                    timestamp,
                    event: decode_event(&doc)?,
                })
            })
            .collect()
    }
}
