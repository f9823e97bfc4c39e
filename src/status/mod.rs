//! Entity status engine: configuration table, state machine and manager.

mod conf;
mod machine;
mod manager;

pub use conf::*;
pub use machine::{
    apply_criticity, expire, prune_flapping, settle, update_status, Check, Criticity, StateCount,
    StatusTask,
};
pub use manager::*;

use crate::db::{DbError, StatusValue};
use thiserror::Error;

/// Status processing errors. All of them abort the current event only.
#[derive(Error, Debug)]
pub enum StatusError {
    #[error("no task found to process status {status}: {source}")]
    NoTask {
        status: StatusValue,
        #[source]
        source: ConfigError,
    },
    #[error("malformed status for {entity_id}: {reason}")]
    Malformed { entity_id: String, reason: String },
    #[error("no status recorded for entity {0}")]
    UnknownEntity(String),
    #[error("status store error: {0}")]
    Store(#[from] DbError),
}
