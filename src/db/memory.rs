//! In-process store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};

use super::{apply_change, DbError, Event, EventStore, LogEntry, LogStore, StatusRecord, StatusStore};
use super::StatusValue;

#[derive(Default)]
struct Tables {
    statuses: HashMap<String, StatusRecord>,
    events: HashMap<String, Event>,
    log: Vec<LogEntry>,
}

/// Thread-safe in-memory implementation of all storage traits.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn log_len(&self) -> usize {
        self.tables().log.len()
    }
}

impl StatusStore for MemoryStore {
    fn get_status(&self, entity_id: &str) -> Result<Option<StatusRecord>, DbError> {
        Ok(self.tables().statuses.get(entity_id).cloned())
    }

    fn put_status(&self, entity_id: &str, status: &StatusRecord) -> Result<(), DbError> {
        self.tables()
            .statuses
            .insert(entity_id.to_string(), status.clone());
        Ok(())
    }

    fn find_expired_statuses(
        &self,
        stealthy_before: i64,
        flapping_before: i64,
    ) -> Result<Vec<(String, StatusRecord)>, DbError> {
        let tables = self.tables();
        let mut found: Vec<_> = tables
            .statuses
            .iter()
            .filter(|(_, s)| match s.value {
                StatusValue::Stealthy => s.stealthy_time.is_some_and(|t| t < stealthy_before),
                StatusValue::Flapping => s.oldest_flap().is_some_and(|t| t < flapping_before),
                _ => false,
            })
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }
}

impl EventStore for MemoryStore {
    fn get_event(&self, routing_key: &str) -> Result<Option<Event>, DbError> {
        Ok(self.tables().events.get(routing_key).cloned())
    }

    fn put_event(&self, routing_key: &str, event: &Event) -> Result<(), DbError> {
        self.tables()
            .events
            .insert(routing_key.to_string(), event.clone());
        Ok(())
    }

    fn update_event(&self, routing_key: &str, change: &Map<String, Value>) -> Result<(), DbError> {
        let mut tables = self.tables();
        let event = tables.events.get(routing_key).ok_or(DbError::NotFound)?;
        let updated = apply_change(event, change)?;
        tables.events.insert(routing_key.to_string(), updated);
        Ok(())
    }
}

impl LogStore for MemoryStore {
    fn append_log(&self, entry: &LogEntry) -> Result<(), DbError> {
        let mut tables = self.tables();
        if tables.log.iter().any(|e| e.id == entry.id) {
            return Err(DbError::Duplicate(entry.id.clone()));
        }
        tables.log.push(entry.clone());
        Ok(())
    }

    fn get_log(&self, routing_key: &str) -> Result<Vec<LogEntry>, DbError> {
        let mut entries: Vec<_> = self
            .tables()
            .log
            .iter()
            .filter(|e| e.routing_key == routing_key)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }
}
