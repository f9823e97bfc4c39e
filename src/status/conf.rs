//! Status configuration: links a status name to its code and task.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use thiserror::Error;

use super::machine::StatusTask;
use crate::db::{StatusRecord, StatusValue};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("status {0} not registered")]
    UnknownName(String),
    #[error("status {0} has no code")]
    MissingCode(String),
    #[error("code {0} does not exist")]
    UnknownCode(u8),
    #[error("code {0} is registered twice")]
    DuplicateCode(u8),
    #[error("no task registered for status {0}")]
    MissingTask(String),
    #[error("no task {path} registered for status {name}")]
    UnknownTask { name: String, path: String },
    #[error("invalid status configuration: {0}")]
    Parse(String),
}

/// One row of the status table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusEntry {
    #[serde(default)]
    pub code: Option<u8>,
    #[serde(default)]
    pub task: Option<String>,
}

impl StatusEntry {
    pub fn new(code: u8, task: &str) -> Self {
        Self {
            code: Some(code),
            task: Some(task.to_string()),
        }
    }
}

/// What to look a task up by.
#[derive(Debug, Clone, Copy)]
pub enum StatusSelector<'a> {
    Name(&'a str),
    Code(u8),
    Record(&'a StatusRecord),
}

impl<'a> From<&'a str> for StatusSelector<'a> {
    fn from(name: &'a str) -> Self {
        StatusSelector::Name(name)
    }
}

impl From<u8> for StatusSelector<'_> {
    fn from(code: u8) -> Self {
        StatusSelector::Code(code)
    }
}

impl From<StatusValue> for StatusSelector<'_> {
    fn from(value: StatusValue) -> Self {
        StatusSelector::Code(value.code())
    }
}

impl<'a> From<&'a StatusRecord> for StatusSelector<'a> {
    fn from(record: &'a StatusRecord) -> Self {
        StatusSelector::Record(record)
    }
}

/// Immutable status table with a reverse code index built at construction.
#[derive(Debug, Clone)]
pub struct StatusConfiguration {
    entries: BTreeMap<String, StatusEntry>,
    name_by_code: HashMap<u8, String>,
}

impl StatusConfiguration {
    pub fn new(entries: BTreeMap<String, StatusEntry>) -> Result<Self, ConfigError> {
        let (name_by_code, duplicate) = index_codes(&entries);
        if let Some(code) = duplicate {
            return Err(ConfigError::DuplicateCode(code));
        }

        Ok(Self {
            entries,
            name_by_code,
        })
    }

    /// Parse `{"<name>": {"code": <u8>, "task": "<path>"}, ...}`.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let entries: BTreeMap<String, StatusEntry> =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::new(entries)
    }

    /// Status code registered for `name`.
    pub fn value(&self, name: &str) -> Result<u8, ConfigError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| ConfigError::UnknownName(name.to_string()))?;
        entry
            .code
            .ok_or_else(|| ConfigError::MissingCode(name.to_string()))
    }

    /// Status name registered for `code`.
    pub fn name(&self, code: u8) -> Result<&str, ConfigError> {
        self.name_by_code
            .get(&code)
            .map(String::as_str)
            .ok_or(ConfigError::UnknownCode(code))
    }

    /// Task able to process an entity in the selected status.
    pub fn task<'a>(&self, selector: impl Into<StatusSelector<'a>>) -> Result<StatusTask, ConfigError> {
        let name = match selector.into() {
            StatusSelector::Name(name) => name,
            StatusSelector::Code(code) => self.name(code)?,
            StatusSelector::Record(record) => self.name(record.value.code())?,
        };

        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| ConfigError::UnknownName(name.to_string()))?;
        let path = entry
            .task
            .as_deref()
            .ok_or_else(|| ConfigError::MissingTask(name.to_string()))?;

        StatusTask::from_path(path).ok_or_else(|| ConfigError::UnknownTask {
            name: name.to_string(),
            path: path.to_string(),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Reverse code index, and the first code found registered twice.
fn index_codes(entries: &BTreeMap<String, StatusEntry>) -> (HashMap<u8, String>, Option<u8>) {
    let mut name_by_code = HashMap::new();
    let mut duplicate = None;
    for (name, entry) in entries {
        if let Some(code) = entry.code {
            if name_by_code.insert(code, name.clone()).is_some() && duplicate.is_none() {
                duplicate = Some(code);
            }
        }
    }
    (name_by_code, duplicate)
}

impl Default for StatusConfiguration {
    /// The five built-in statuses, whose codes are distinct.
    fn default() -> Self {
        let entries: BTreeMap<String, StatusEntry> = StatusValue::ALL
            .into_iter()
            .map(|value| {
                let task = StatusTask::for_status(value);
                (
                    value.name().to_string(),
                    StatusEntry::new(value.code(), task.path()),
                )
            })
            .collect();
        let (name_by_code, _) = index_codes(&entries);

        Self {
            entries,
            name_by_code,
        }
    }
}
