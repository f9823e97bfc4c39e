//! Live event records and their change log.
//!
//! Every processed event is merged into the live record kept for its
//! routing key. Only fields that differ from the stored record are written,
//! and a copy of the event is appended to the log when its severity changed.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::db::{Ack, Cancel, DbError, Event, EventStore, LogEntry, LogStore, StatusValue};

const TICKET_FIELDS: [&str; 4] = [
    "ticket",
    "ticket_date",
    "ticket_declared_author",
    "ticket_declared_date",
];

pub struct Archiver {
    events: Arc<dyn EventStore>,
    log: Arc<dyn LogStore>,
    exclusion_fields: Vec<String>,
}

impl Archiver {
    pub fn new(
        events: Arc<dyn EventStore>,
        log: Arc<dyn LogStore>,
        exclusion_fields: Vec<String>,
    ) -> Self {
        Self {
            events,
            log,
            exclusion_fields,
        }
    }

    pub fn get_event(&self, routing_key: &str) -> Result<Option<Event>, DbError> {
        self.events.get_event(routing_key)
    }

    pub fn history(&self, routing_key: &str) -> Result<Vec<LogEntry>, DbError> {
        self.log.get_log(routing_key)
    }

    /// Merge `event` into its live record.
    ///
    /// Returns whether a log entry was appended. Failing to write the live
    /// record is an error; failing to append to the log is only reported.
    pub fn process(&self, mut event: Event) -> Result<bool, DbError> {
        let routing_key = event.routing_key();
        event.rk = Some(routing_key.clone());
        let timestamp = *event
            .timestamp
            .get_or_insert_with(|| Utc::now().timestamp());
        let state = event.state;

        let prior = match self.events.get_event(&routing_key)? {
            Some(prior) => prior,
            None => {
                event.last_state_change = Some(timestamp);
                self.events.put_event(&routing_key, &event)?;
                tracing::debug!(routing_key = %routing_key, state, "New event");
                return Ok(false);
            }
        };

        event.last_state_change = Some(prior.last_state_change.unwrap_or(timestamp));

        let mut changed = false;
        if state != prior.state {
            event.previous_state = Some(prior.state);
            changed = true;
        } else if event.state_type != prior.state_type {
            changed = true;
        }

        if changed {
            if (state == 0) != (prior.state == 0) {
                event.previous_state_change_ts = event.last_state_change;
            }
            event.last_state_change = Some(timestamp);
        }

        let change = self.diff(&event, &prior)?;
        if !change.is_empty() {
            tracing::debug!(
                routing_key = %routing_key,
                fields = change.len(),
                "Updating event"
            );
            self.events.update_event(&routing_key, &change)?;
        }

        let have_to_log = event.previous_state.is_some_and(|previous| previous != state);
        if !have_to_log {
            return Ok(false);
        }

        if prior.ack.is_some() {
            event.ack = prior.ack.clone();
        }

        let entry = LogEntry::new(&routing_key, timestamp, event);
        match self.log.append_log(&entry) {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::warn!(id = %entry.id, "Failed to append event log: {}", e);
                Ok(false)
            }
        }
    }

    /// Fields to write on the live record, including the retention rules for
    /// ack, cancel, ticket and keep-state information.
    fn diff(&self, event: &Event, prior: &Event) -> Result<Map<String, Value>, DbError> {
        let new_doc = to_document(event)?;
        let old_doc = to_document(prior)?;

        let mut change: Map<String, Value> = new_doc
            .iter()
            .filter(|(key, _)| !self.exclusion_fields.iter().any(|f| f == *key))
            .filter(|(key, value)| old_doc.get(key.as_str()) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let status = event.status.unwrap_or(if event.is_alert() {
            StatusValue::Ongoing
        } else {
            StatusValue::Off
        });

        if prior.ack.is_some() {
            if status == StatusValue::Off {
                change.insert("ack".to_string(), Value::Null);
            } else {
                change.remove("ack");
            }
        }

        if prior.cancel.is_some() {
            if matches!(status, StatusValue::Off | StatusValue::Ongoing) {
                change.insert("cancel".to_string(), Value::Null);
            } else {
                change.remove("cancel");
            }
        }

        if status == StatusValue::Off {
            for field in TICKET_FIELDS {
                if old_doc.contains_key(field) {
                    change.insert(field.to_string(), Value::Null);
                }
            }
        }

        let pinned = prior.keep_state == Some(true);
        let mut event_reset = false;

        if pinned && event.state == 0 {
            change.insert("keep_state".to_string(), Value::Bool(false));
            event_reset = true;
        }

        match event.keep_state {
            None if pinned && !event_reset => {
                change.insert("state".to_string(), Value::from(prior.state));
                change.remove("output");
            }
            Some(_) => {
                change.insert(
                    "change_state_output".to_string(),
                    Value::from(event.output.clone().unwrap_or_default()),
                );
                change.insert(
                    "output".to_string(),
                    Value::from(prior.output.clone().unwrap_or_default()),
                );
            }
            None => {}
        }

        Ok(change)
    }

    pub fn acknowledge(&self, routing_key: &str, ack: &Ack) -> Result<(), DbError> {
        self.annotate(routing_key, [("ack", to_value(ack)?)])
    }

    pub fn remove_ack(&self, routing_key: &str) -> Result<(), DbError> {
        self.annotate(routing_key, [("ack", Value::Null)])
    }

    pub fn mark_canceled(&self, routing_key: &str, cancel: &Cancel) -> Result<(), DbError> {
        self.annotate(
            routing_key,
            [
                ("cancel", to_value(cancel)?),
                ("status", to_value(StatusValue::Canceled)?),
            ],
        )
    }

    pub fn mark_uncanceled(&self, routing_key: &str, status: StatusValue) -> Result<(), DbError> {
        self.annotate(
            routing_key,
            [("cancel", Value::Null), ("status", to_value(status)?)],
        )
    }

    pub fn set_status(&self, routing_key: &str, status: StatusValue) -> Result<(), DbError> {
        self.annotate(routing_key, [("status", to_value(status)?)])
    }

    fn annotate<const N: usize>(
        &self,
        routing_key: &str,
        fields: [(&str, Value); N],
    ) -> Result<(), DbError> {
        let change: Map<String, Value> = fields
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        self.events.update_event(routing_key, &change)
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, DbError> {
    Ok(serde_json::to_value(value)?)
}

fn to_document(event: &Event) -> Result<Map<String, Value>, DbError> {
    match serde_json::to_value(event)? {
        Value::Object(doc) => Ok(doc),
        _ => Err(DbError::Malformed("event is not a document".to_string())),
    }
}
