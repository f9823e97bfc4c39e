//! Persisted record types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Stability classification of an entity.
///
/// Stored and exchanged as its numeric code (0..=4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StatusValue {
    Off,
    Ongoing,
    Stealthy,
    Flapping,
    Canceled,
}

impl StatusValue {
    pub const ALL: [StatusValue; 5] = [
        StatusValue::Off,
        StatusValue::Ongoing,
        StatusValue::Stealthy,
        StatusValue::Flapping,
        StatusValue::Canceled,
    ];

    pub fn code(self) -> u8 {
        match self {
            StatusValue::Off => 0,
            StatusValue::Ongoing => 1,
            StatusValue::Stealthy => 2,
            StatusValue::Flapping => 3,
            StatusValue::Canceled => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StatusValue::Off => "off",
            StatusValue::Ongoing => "ongoing",
            StatusValue::Stealthy => "stealthy",
            StatusValue::Flapping => "flapping",
            StatusValue::Canceled => "canceled",
        }
    }
}

impl TryFrom<u8> for StatusValue {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        StatusValue::ALL
            .into_iter()
            .find(|v| v.code() == code)
            .ok_or_else(|| format!("unknown status code {}", code))
    }
}

impl From<StatusValue> for u8 {
    fn from(value: StatusValue) -> Self {
        value.code()
    }
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-entity status document.
///
/// All timestamps are seconds since the epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub value: StatusValue,
    /// Last seen raw check state (0 = OK).
    pub state: i32,
    pub timestamp: i64,
    pub last_state_change: i64,
    /// Start of the current ONGOING dwell window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_time: Option<i64>,
    /// Start of the STEALTHY window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stealthy_time: Option<i64>,
    /// Oscillation timestamps, oldest first, kept within the flapping window.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flapping_times: Vec<i64>,
    /// Live event record last processed for this entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,
}

impl StatusRecord {
    /// Record for an entity seen for the first time.
    pub fn new(state: i32, timestamp: i64) -> Self {
        let (value, pending_time) = if state == 0 {
            (StatusValue::Off, None)
        } else {
            (StatusValue::Ongoing, Some(timestamp))
        };

        Self {
            value,
            state,
            timestamp,
            last_state_change: timestamp,
            pending_time,
            stealthy_time: None,
            flapping_times: Vec::new(),
            routing_key: None,
        }
    }

    pub fn oldest_flap(&self) -> Option<i64> {
        self.flapping_times.first().copied()
    }

    /// Whether the periodic sweep should resolve this record at `now`.
    pub fn is_expired(&self, now: i64, stealthy_show: i64, flapping_time: i64) -> bool {
        match self.value {
            StatusValue::Stealthy => self
                .stealthy_time
                .is_some_and(|since| since < now.saturating_sub(stealthy_show)),
            StatusValue::Flapping => self
                .oldest_flap()
                .is_some_and(|oldest| oldest < now.saturating_sub(flapping_time)),
            _ => false,
        }
    }
}

/// Acknowledgement attached to a live event record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub timestamp: i64,
}

/// Administrative cancellation attached to a live event record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancel {
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub timestamp: i64,
}

/// A check event and the bookkeeping derived from it.
///
/// The same type is used for incoming events, the live record kept per
/// routing key, and archived log copies. Unknown fields are preserved in
/// `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rk: Option<String>,
    #[serde(default)]
    pub connector: String,
    #[serde(default)]
    pub connector_name: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub source_type: String,
    #[serde(default)]
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default)]
    pub state: i32,
    #[serde(default = "default_state_type")]
    pub state_type: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_state_change: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state_change_ts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<Ack>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel: Option<Cancel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_declared_author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_declared_date: Option<i64>,
    /// Set by the UI to pin the displayed state until the next OK.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_state: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_state_output: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_state_type() -> i32 {
    1
}

impl Event {
    /// Routing key of this event: the explicit `rk` when present, otherwise
    /// derived from the source fields.
    pub fn routing_key(&self) -> String {
        if let Some(rk) = &self.rk {
            return rk.clone();
        }

        let mut rk = format!(
            "{}.{}.{}.{}.{}",
            self.connector, self.connector_name, self.event_type, self.source_type, self.component
        );
        if self.source_type == "resource" {
            rk.push('.');
            rk.push_str(self.resource.as_deref().unwrap_or_default());
        }
        rk
    }

    pub fn is_alert(&self) -> bool {
        self.state != 0
    }
}

/// Immutable copy of an event taken when its severity changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// `{routing_key}.{timestamp}`
    pub id: String,
    pub routing_key: String,
    pub timestamp: i64,
    pub event: Event,
}

impl LogEntry {
    pub fn new(routing_key: &str, timestamp: i64, event: Event) -> Self {
        Self {
            id: format!("{}.{}", routing_key, timestamp),
            routing_key: routing_key.to_string(),
            timestamp,
            event,
        }
    }
}
