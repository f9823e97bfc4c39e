//! Configuration module for statusd.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::status::StatusConfiguration;

pub const DEFAULT_FLAPPING_FREQ: usize = 10;
pub const DEFAULT_FLAPPING_TIME: i64 = 3600;
pub const DEFAULT_STEALTHY_TIME: i64 = 360;
pub const DEFAULT_STEALTHY_SHOW: i64 = 360;
pub const DEFAULT_RESTORE_EVENT: bool = true;

/// Thresholds and field policies used by the status engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Oscillations within `flapping_time` that make an entity FLAPPING.
    pub flapping_freq: usize,
    /// Flapping window in seconds.
    pub flapping_time: i64,
    /// Seconds after an alert starts during which a recovery is STEALTHY.
    pub stealthy_time: i64,
    /// Seconds a STEALTHY status is kept before the sweep resolves it.
    pub stealthy_show: i64,
    /// Whether a changing state lifts a cancellation.
    pub restore_event: bool,
    /// Event fields never written by the change diff.
    pub exclusion_fields: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flapping_freq: DEFAULT_FLAPPING_FREQ,
            flapping_time: DEFAULT_FLAPPING_TIME,
            stealthy_time: DEFAULT_STEALTHY_TIME,
            stealthy_show: DEFAULT_STEALTHY_SHOW,
            restore_event: DEFAULT_RESTORE_EVENT,
            exclusion_fields: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load engine thresholds from environment variables.
    ///
    /// Environment variables:
    /// - `STATUSD_FLAPPING_FREQ` (default: 10, minimum 1)
    /// - `STATUSD_FLAPPING_TIME` seconds (default: 3600)
    /// - `STATUSD_STEALTHY_TIME` seconds (default: 360)
    /// - `STATUSD_STEALTHY_SHOW` seconds (default: 360)
    /// - `STATUSD_RESTORE_EVENT` (default: true)
    /// - `STATUSD_EXCLUSION_FIELDS` comma separated (default: empty)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Some(freq) = env_parse::<usize>("STATUSD_FLAPPING_FREQ") {
            cfg.flapping_freq = freq.max(1);
        }
        if let Some(secs) = env_parse("STATUSD_FLAPPING_TIME") {
            cfg.flapping_time = secs;
        }
        if let Some(secs) = env_parse("STATUSD_STEALTHY_TIME") {
            cfg.stealthy_time = secs;
        }
        if let Some(secs) = env_parse("STATUSD_STEALTHY_SHOW") {
            cfg.stealthy_show = secs;
        }
        if let Some(restore) = env_parse("STATUSD_RESTORE_EVENT") {
            cfg.restore_event = restore;
        }
        if let Ok(fields) = env::var("STATUSD_EXCLUSION_FIELDS") {
            cfg.exclusion_fields = parse_field_list(&fields);
        }

        cfg
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "statusd.db")
    pub db_path: String,
    /// Period of the expiry sweep (default: 60s)
    pub beat_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "statusd.db".to_string(),
            beat_interval: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `STATUSD_HTTP_PORT`: HTTP port (default: 8080)
    /// - `STATUSD_DB_PATH`: Database file path (default: "statusd.db")
    /// - `STATUSD_BEAT_INTERVAL`: sweep period in seconds (default: 60)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Some(port) = env_parse("STATUSD_HTTP_PORT") {
            cfg.http_port = port;
        }

        if let Ok(db_path) = env::var("STATUSD_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(secs) = env_parse::<u64>("STATUSD_BEAT_INTERVAL") {
            if secs > 0 {
                cfg.beat_interval = Duration::from_secs(secs);
            }
        }

        cfg
    }
}

/// Load the status table from `STATUSD_STATUS_CONF`, falling back to the
/// built-in table when unset or invalid.
pub fn load_status_conf() -> StatusConfiguration {
    match env::var("STATUSD_STATUS_CONF") {
        Ok(text) => match StatusConfiguration::from_json(&text) {
            Ok(conf) => conf,
            Err(e) => {
                tracing::warn!("Ignoring STATUSD_STATUS_CONF: {}", e);
                StatusConfiguration::default()
            }
        },
        Err(_) => StatusConfiguration::default(),
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_field_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}
