//! Storage for statuses, live events and the event log.
//!
//! The engine only talks to the traits below. Two implementations are
//! provided: [`Store`] on SQLite and [`MemoryStore`] for tests and embedding.

mod memory;
mod models;
mod store;

pub use memory::*;
pub use models::*;
pub use store::*;

use serde_json::{Map, Value};

/// Per-entity status documents.
pub trait StatusStore: Send + Sync {
    fn get_status(&self, entity_id: &str) -> Result<Option<StatusRecord>, DbError>;

    fn put_status(&self, entity_id: &str, status: &StatusRecord) -> Result<(), DbError>;

    /// Statuses that are STEALTHY with `stealthy_time < stealthy_before`, or
    /// FLAPPING with their oldest flap `< flapping_before`.
    fn find_expired_statuses(
        &self,
        stealthy_before: i64,
        flapping_before: i64,
    ) -> Result<Vec<(String, StatusRecord)>, DbError>;
}

/// Live event records keyed by routing key.
pub trait EventStore: Send + Sync {
    fn get_event(&self, routing_key: &str) -> Result<Option<Event>, DbError>;

    fn put_event(&self, routing_key: &str, event: &Event) -> Result<(), DbError>;

    /// Apply a partial update. A `null` value removes the field.
    fn update_event(&self, routing_key: &str, change: &Map<String, Value>) -> Result<(), DbError>;
}

/// Append-only event history.
pub trait LogStore: Send + Sync {
    fn append_log(&self, entry: &LogEntry) -> Result<(), DbError>;

    /// Entries for a routing key, oldest first.
    fn get_log(&self, routing_key: &str) -> Result<Vec<LogEntry>, DbError>;
}

/// Merge a partial update into a stored document.
pub(crate) fn merge_change(doc: &mut Map<String, Value>, change: &Map<String, Value>) {
    for (key, value) in change {
        if value.is_null() {
            doc.remove(key);
        } else {
            doc.insert(key.clone(), value.clone());
        }
    }
}

/// Apply a partial update to a typed event.
pub(crate) fn apply_change(event: &Event, change: &Map<String, Value>) -> Result<Event, DbError> {
    let mut doc = match serde_json::to_value(event)? {
        Value::Object(doc) => doc,
        _ => return Err(DbError::Malformed("event is not a document".to_string())),
    };
    merge_change(&mut doc, change);
    Ok(serde_json::from_value(Value::Object(doc))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_change_sets_and_removes() {
        let event = Event {
            component: "web01".to_string(),
            state: 2,
            ticket: Some("T-1".to_string()),
            ..Default::default()
        };

        let change = json!({"state": 0, "ticket": null, "note": "x"});
        let updated = apply_change(&event, change.as_object().unwrap()).unwrap();

        assert_eq!(updated.state, 0);
        assert_eq!(updated.ticket, None);
        assert_eq!(updated.component, "web01");
        assert_eq!(updated.extra.get("note"), Some(&json!("x")));
    }
}
