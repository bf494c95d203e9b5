//! Change log domain model.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

use crate::ids::{ChangeLogId, TransactionId};

/// One recorded data change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub change_log_id: ChangeLogId,
    pub transaction_id: Option<TransactionId>,
    pub username: String,
    pub operation: ChangeOperation,
    pub entity_type: String,
    /// Id key of the affected row; `None` for whole-repository operations.
    pub entity_id: Option<String>,
    /// Row snapshot after the change, for adds and updates.
    pub snapshot: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
}

/// Kind of data change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOperation {
    Add,
    Update,
    Delete,
    DeleteAll,
}

impl ChangeLogEntry {
    /// Create a new change log entry.
    #[must_use]
    pub fn new(
        transaction_id: Option<TransactionId>,
        username: impl Into<String>,
        operation: ChangeOperation,
        entity_type: impl Into<String>,
    ) -> Self {
        Self {
            change_log_id: ChangeLogId::new(),
            transaction_id,
            username: username.into(),
            operation,
            entity_type: entity_type.into(),
            entity_id: None,
            snapshot: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    #[must_use]
    pub fn with_snapshot(mut self, snapshot: JsonValue) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

impl ChangeOperation {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::DeleteAll => "delete_all",
        }
    }
}

impl FromStr for ChangeOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(Self::Add),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "delete_all" => Ok(Self::DeleteAll),
            _ => Err(format!("invalid change operation: {s}")),
        }
    }
}

/// Destination for committed change log entries.
pub trait ChangeLogSink: Send + Sync {
    fn write(&self, entries: Vec<ChangeLogEntry>);
}

/// Sink keeping entries in memory, newest last.
#[derive(Debug, Default)]
pub struct MemoryChangeLog {
    entries: RwLock<Vec<ChangeLogEntry>>,
}

impl MemoryChangeLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entries(&self) -> Vec<ChangeLogEntry> {
        self.entries.read().clone()
    }

    #[must_use]
    pub fn entries_for(&self, entity_type: &str) -> Vec<ChangeLogEntry> {
        self.entries
            .read()
            .iter()
            .filter(|entry| entry.entity_type == entity_type)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ChangeLogSink for MemoryChangeLog {
    fn write(&self, entries: Vec<ChangeLogEntry>) {
        self.entries.write().extend(entries);
    }
}
