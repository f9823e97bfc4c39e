//! Event processing entry points.
//!
//! The [`Engine`] ties entity resolution, the status machine and the
//! archiver together, and serializes work on each entity through
//! [`EntityLocks`].

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::db::{Ack, Cancel, DbError, Event, EventStore, LogEntry, LogStore, StatusRecord, StatusStore};
use crate::event::{Archiver, EntityResolver, PathResolver, ResolveError};
use crate::status::{Check, StatusConfiguration, StatusError, StatusManager, SweepReport};

const DEFAULT_STRIPES: usize = 64;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error("event store error: {0}")]
    Store(#[from] DbError),
    #[error("cannot resolve entity: {0}")]
    Resolve(#[from] ResolveError),
    #[error("unknown event {0}")]
    UnknownEvent(String),
}

/// Striped per-entity mutexes.
///
/// Two operations on the same entity always take the same stripe.
pub struct EntityLocks {
    stripes: Vec<Mutex<()>>,
}

impl EntityLocks {
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe(&self, entity_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        entity_id.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    pub fn lock(&self, entity_id: &str) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe(entity_id)]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EntityLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}

pub struct Engine {
    resolver: Arc<dyn EntityResolver>,
    statuses: StatusManager,
    archiver: Archiver,
    locks: EntityLocks,
}

impl Engine {
    pub fn new(
        resolver: Arc<dyn EntityResolver>,
        statuses: StatusManager,
        archiver: Archiver,
    ) -> Self {
        Self {
            resolver,
            statuses,
            archiver,
            locks: EntityLocks::default(),
        }
    }

    /// Engine over a single store backing statuses, events and the log,
    /// with the default path resolver.
    pub fn with_store<S>(store: Arc<S>, conf: StatusConfiguration, cfg: EngineConfig) -> Self
    where
        S: StatusStore + EventStore + LogStore + 'static,
    {
        let archiver = Archiver::new(
            store.clone(),
            store.clone(),
            cfg.exclusion_fields.clone(),
        );
        let statuses = StatusManager::new(store, conf, cfg);
        Self::new(Arc::new(PathResolver), statuses, archiver)
    }

    pub fn config(&self) -> &EngineConfig {
        self.statuses.config()
    }

    /// Process one incoming event.
    ///
    /// Returns the entity id while the entity is still alerting. Events whose
    /// entity cannot be resolved are dropped.
    pub fn process_event(&self, mut event: Event) -> Result<Option<String>, EngineError> {
        let entity_id = match self.resolver.entity_id(&event) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(routing_key = %event.routing_key(), "Dropping event: {}", e);
                return Ok(None);
            }
        };

        let timestamp = *event
            .timestamp
            .get_or_insert_with(|| Utc::now().timestamp());
        let state = event.state;

        let routing_key = event.routing_key();
        let _guard = self.locks.lock(&entity_id);

        let record = self
            .statuses
            .process(&entity_id, &routing_key, Check::new(state, timestamp))?;
        event.status = Some(record.value);

        let logged = self.archiver.process(event)?;
        tracing::debug!(
            entity_id = %entity_id,
            status = %record.value,
            state,
            logged,
            "Event processed"
        );

        Ok((state != 0).then_some(entity_id))
    }

    /// Periodic entry point; failures are logged and never propagated.
    pub fn process_beat(&self, now: i64) {
        let report = self.sweep(now);
        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                resolved = report.resolved.len(),
                failed = report.failed,
                "Beat sweep done"
            );
        }
    }

    /// Resolve statuses stuck in STEALTHY or FLAPPING past their windows.
    pub fn sweep(&self, now: i64) -> SweepReport {
        let mut report = SweepReport::default();

        let candidates = match self.statuses.find_expired(now) {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!("Beat: failed to query expired statuses: {}", e);
                return report;
            }
        };
        report.examined = candidates.len();

        for (entity_id, _) in candidates {
            let _guard = self.locks.lock(&entity_id);
            match self.statuses.expire(&entity_id, now) {
                Ok(Some(record)) => {
                    if let Some(routing_key) = &record.routing_key {
                        if let Err(e) = self.archiver.set_status(routing_key, record.value) {
                            tracing::warn!(
                                entity_id = %entity_id,
                                routing_key = %routing_key,
                                "Beat: failed to update event status: {}",
                                e
                            );
                        }
                    }
                    report.resolved.push(entity_id);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(entity_id = %entity_id, "Beat: failed to expire status: {}", e);
                    report.failed += 1;
                }
            }
        }

        report
    }

    pub fn cancel(&self, routing_key: &str, cancel: Cancel) -> Result<StatusRecord, EngineError> {
        let entity_id = self.entity_of(routing_key)?;
        let _guard = self.locks.lock(&entity_id);

        let record = self.statuses.cancel(&entity_id, cancel.timestamp)?;
        self.archiver.mark_canceled(routing_key, &cancel)?;
        tracing::info!(routing_key, author = %cancel.author, "Event canceled");
        Ok(record)
    }

    pub fn uncancel(&self, routing_key: &str, timestamp: i64) -> Result<StatusRecord, EngineError> {
        let entity_id = self.entity_of(routing_key)?;
        let _guard = self.locks.lock(&entity_id);

        let record = self.statuses.uncancel(&entity_id, timestamp)?;
        self.archiver.mark_uncanceled(routing_key, record.value)?;
        Ok(record)
    }

    pub fn acknowledge(&self, routing_key: &str, ack: Ack) -> Result<(), EngineError> {
        let entity_id = self.entity_of(routing_key)?;
        let _guard = self.locks.lock(&entity_id);

        self.archiver.acknowledge(routing_key, &ack)?;
        tracing::info!(routing_key, author = %ack.author, "Event acknowledged");
        Ok(())
    }

    pub fn remove_ack(&self, routing_key: &str) -> Result<(), EngineError> {
        let entity_id = self.entity_of(routing_key)?;
        let _guard = self.locks.lock(&entity_id);

        self.archiver.remove_ack(routing_key)?;
        Ok(())
    }

    pub fn status(&self, entity_id: &str) -> Result<Option<StatusRecord>, EngineError> {
        Ok(self.statuses.get_status(entity_id)?)
    }

    pub fn event(&self, routing_key: &str) -> Result<Option<Event>, EngineError> {
        Ok(self.archiver.get_event(routing_key)?)
    }

    pub fn history(&self, routing_key: &str) -> Result<Vec<LogEntry>, EngineError> {
        Ok(self.archiver.history(routing_key)?)
    }

    fn entity_of(&self, routing_key: &str) -> Result<String, EngineError> {
        let event = self
            .archiver
            .get_event(routing_key)?
            .ok_or_else(|| EngineError::UnknownEvent(routing_key.to_string()))?;
        Ok(self.resolver.entity_id(&event)?)
    }
}
