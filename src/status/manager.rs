//! Loads, computes and persists entity statuses.

use std::sync::Arc;

use serde::Serialize;

use super::conf::StatusConfiguration;
use super::machine::{self, Check};
use super::StatusError;
use crate::config::EngineConfig;
use crate::db::{DbError, StatusRecord, StatusStore, StatusValue};

/// Outcome of one expiry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Candidates returned by the expiry query.
    pub examined: usize,
    /// Entities whose status was rewritten.
    pub resolved: Vec<String>,
    /// Candidates that failed; they keep their status until the next sweep.
    pub failed: usize,
}

/// Applies checks to entity statuses.
///
/// Callers are responsible for entity exclusivity around each call; see
/// [`crate::engine::EntityLocks`].
pub struct StatusManager {
    store: Arc<dyn StatusStore>,
    conf: StatusConfiguration,
    cfg: EngineConfig,
}

impl StatusManager {
    pub fn new(store: Arc<dyn StatusStore>, conf: StatusConfiguration, cfg: EngineConfig) -> Self {
        Self { store, conf, cfg }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn status_conf(&self) -> &StatusConfiguration {
        &self.conf
    }

    pub fn get_status(&self, entity_id: &str) -> Result<Option<StatusRecord>, StatusError> {
        self.store.get_status(entity_id).map_err(|e| match e {
            DbError::Malformed(reason) => StatusError::Malformed {
                entity_id: entity_id.to_string(),
                reason,
            },
            other => StatusError::Store(other),
        })
    }

    /// Apply `check` to the entity's status and persist the result.
    ///
    /// Checks older than the last computation are ignored and the stored
    /// status is returned unchanged.
    pub fn process(
        &self,
        entity_id: &str,
        routing_key: &str,
        check: Check,
    ) -> Result<StatusRecord, StatusError> {
        let mut record = match self.get_status(entity_id)? {
            None => {
                let record = StatusRecord::new(check.state, check.timestamp);
                tracing::debug!(
                    entity_id,
                    status = %record.value,
                    state = check.state,
                    "New status"
                );
                record
            }
            Some(record) if check.timestamp < record.timestamp => {
                tracing::debug!(
                    entity_id,
                    timestamp = check.timestamp,
                    last = record.timestamp,
                    "Ignoring stale check"
                );
                return Ok(record);
            }
            Some(mut record) => {
                let previous = record.value;
                let task = self.conf.task(&record).map_err(|source| StatusError::NoTask {
                    status: previous,
                    source,
                })?;

                task.run(&mut record, check, &self.cfg);
                machine::update_status(&mut record, check, &self.cfg);

                if record.value != previous {
                    tracing::debug!(
                        entity_id,
                        from = %previous,
                        to = %record.value,
                        state = check.state,
                        flaps = record.flapping_times.len(),
                        "Status changed"
                    );
                }
                record
            }
        };

        record.routing_key = Some(routing_key.to_string());
        self.store.put_status(entity_id, &record)?;
        Ok(record)
    }

    /// Mark the entity CANCELED.
    pub fn cancel(&self, entity_id: &str, timestamp: i64) -> Result<StatusRecord, StatusError> {
        let mut record = self
            .get_status(entity_id)?
            .ok_or_else(|| StatusError::UnknownEntity(entity_id.to_string()))?;

        record.value = StatusValue::Canceled;
        record.pending_time = None;
        record.stealthy_time = None;
        record.timestamp = timestamp;

        self.store.put_status(entity_id, &record)?;
        tracing::info!(entity_id, "Status canceled");
        Ok(record)
    }

    /// Lift a cancellation: the entity gets its plain status back.
    pub fn uncancel(&self, entity_id: &str, timestamp: i64) -> Result<StatusRecord, StatusError> {
        let mut record = self
            .get_status(entity_id)?
            .ok_or_else(|| StatusError::UnknownEntity(entity_id.to_string()))?;

        if record.value == StatusValue::Canceled {
            record.flapping_times.clear();
            let check = Check::new(record.state, timestamp);
            machine::settle(&mut record, check);
            record.timestamp = timestamp;
            self.store.put_status(entity_id, &record)?;
            tracing::info!(entity_id, status = %record.value, "Status uncanceled");
        }

        Ok(record)
    }

    /// Statuses the sweep must resolve at `now`.
    pub fn find_expired(&self, now: i64) -> Result<Vec<(String, StatusRecord)>, StatusError> {
        Ok(self.store.find_expired_statuses(
            now.saturating_sub(self.cfg.stealthy_show),
            now.saturating_sub(self.cfg.flapping_time),
        )?)
    }

    /// Re-read one sweep candidate and resolve it if it is still expired.
    ///
    /// Returns the rewritten status, or `None` when nothing changed.
    pub fn expire(&self, entity_id: &str, now: i64) -> Result<Option<StatusRecord>, StatusError> {
        let Some(mut record) = self.get_status(entity_id)? else {
            return Ok(None);
        };

        if !record.is_expired(now, self.cfg.stealthy_show, self.cfg.flapping_time) {
            return Ok(None);
        }

        let previous = record.value;
        if !machine::expire(&mut record, now, &self.cfg) {
            return Ok(None);
        }

        self.store.put_status(entity_id, &record)?;
        tracing::debug!(
            entity_id,
            from = %previous,
            to = %record.value,
            "Expired status resolved"
        );
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::status::ConfigError;

    fn manager(store: Arc<MemoryStore>) -> StatusManager {
        StatusManager::new(store, StatusConfiguration::default(), EngineConfig::default())
    }

    #[test]
    fn test_scenario_off_ongoing_stealthy_off() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(store.clone());

        let s = manager.process("e", "rk", Check::new(0, 1000)).unwrap();
        assert_eq!(s.value, StatusValue::Off);

        let s = manager.process("e", "rk", Check::new(2, 1001)).unwrap();
        assert_eq!(s.value, StatusValue::Ongoing);

        let s = manager.process("e", "rk", Check::new(0, 1100)).unwrap();
        assert_eq!(s.value, StatusValue::Stealthy);

        let s = manager.process("e", "rk", Check::new(0, 1500)).unwrap();
        assert_eq!(s.value, StatusValue::Off);

        assert_eq!(store.get_status("e").unwrap(), Some(s));
    }

    #[test]
    fn test_first_alert_creates_ongoing() {
        let manager = manager(Arc::new(MemoryStore::new()));
        let s = manager.process("e", "rk", Check::new(3, 50)).unwrap();
        assert_eq!(s.value, StatusValue::Ongoing);
        assert_eq!(s.pending_time, Some(50));
        assert_eq!(s.last_state_change, 50);
    }

    #[test]
    fn test_missing_task_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let conf = StatusConfiguration::from_json(r#"{"off": {"code": 0, "task": "off"}}"#).unwrap();
        let manager = StatusManager::new(store.clone(), conf, EngineConfig::default());

        manager.process("e", "rk", Check::new(2, 10)).unwrap();
        let err = manager.process("e", "rk", Check::new(0, 20)).unwrap_err();
        assert!(matches!(
            err,
            StatusError::NoTask {
                status: StatusValue::Ongoing,
                source: ConfigError::UnknownCode(1),
            }
        ));

        // The stored status is untouched.
        let stored = store.get_status("e").unwrap().unwrap();
        assert_eq!(stored.value, StatusValue::Ongoing);
        assert_eq!(stored.timestamp, 10);
    }

    #[test]
    fn test_cancel_then_ok_event_resolves_off() {
        let manager = manager(Arc::new(MemoryStore::new()));
        manager.process("e", "rk", Check::new(2, 10)).unwrap();
        manager.process("e", "rk", Check::new(0, 20)).unwrap();

        let s = manager.cancel("e", 30).unwrap();
        assert_eq!(s.value, StatusValue::Canceled);

        let s = manager.process("e", "rk", Check::new(0, 40)).unwrap();
        assert_eq!(s.value, StatusValue::Off);
        assert!(s.flapping_times.is_empty());
    }

    #[test]
    fn test_uncancel() {
        let manager = manager(Arc::new(MemoryStore::new()));
        manager.process("e", "rk", Check::new(2, 10)).unwrap();
        manager.cancel("e", 20).unwrap();

        let s = manager.uncancel("e", 30).unwrap();
        assert_eq!(s.value, StatusValue::Ongoing);
        assert_eq!(s.pending_time, Some(30));

        assert!(matches!(
            manager.cancel("unknown", 1),
            Err(StatusError::UnknownEntity(_))
        ));
    }

    #[test]
    fn test_expire_rechecks_candidate() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(store.clone());

        let now = 10_000;
        let mut record = StatusRecord::new(0, now - 1000);
        record.value = StatusValue::Stealthy;
        record.stealthy_time = Some(now - 1000);
        store.put_status("e", &record).unwrap();

        let found = manager.find_expired(now).unwrap();
        assert_eq!(found.len(), 1);

        let resolved = manager.expire("e", now).unwrap().unwrap();
        assert_eq!(resolved.value, StatusValue::Off);
        assert_eq!(store.get_status("e").unwrap(), Some(resolved));

        // Already resolved.
        assert!(manager.expire("e", now).unwrap().is_none());
        assert!(manager.expire("missing", now).unwrap().is_none());
    }

    #[test]
    fn test_stale_check_keeps_flapping() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(store.clone());

        let mut record = StatusRecord::new(2, 2000);
        record.value = StatusValue::Flapping;
        record.flapping_times = (0..10).map(|i| 1900 + i * 10).collect();
        store.put_status("e", &record).unwrap();

        let s = manager.process("e", "rk", Check::new(0, 1500)).unwrap();
        assert_eq!(s, record);
        assert_eq!(store.get_status("e").unwrap(), Some(record));
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(store.clone());

        manager.process("e", "rk", Check::new(2, i64::MIN + 10)).unwrap();
        let s = manager.process("e", "rk", Check::new(0, i64::MAX - 10)).unwrap();
        assert_eq!(s.value, StatusValue::Off);
        assert_eq!(s.flapping_times, vec![i64::MAX - 10]);

        assert!(manager.find_expired(i64::MIN).unwrap().is_empty());
        assert!(manager.expire("e", i64::MIN).unwrap().is_none());
    }

    #[test]
    fn test_routing_key_recorded() {
        let manager = manager(Arc::new(MemoryStore::new()));
        let s = manager.process("e", "a.b.c", Check::new(1, 10)).unwrap();
        assert_eq!(s.routing_key.as_deref(), Some("a.b.c"));
    }
}
