//! Status records for function instances.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::trigger::TriggerReason;

/// Lifecycle of one instance. Ordered so that later states compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Succeeded | InstanceStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInstanceLogEntry {
    pub id: Uuid,
    pub function: String,
    pub reason: TriggerReason,
    pub status: InstanceStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Blobs and queues the instance wrote to.
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl FunctionInstanceLogEntry {
    pub fn queued(id: Uuid, function: impl Into<String>, reason: TriggerReason) -> Self {
        Self {
            id,
            function: function.into(),
            reason,
            status: InstanceStatus::Queued,
            started_at: None,
            ended_at: None,
            error: None,
            outputs: Vec::new(),
        }
    }

    pub fn running(mut self, at: DateTime<Utc>) -> Self {
        self.status = InstanceStatus::Running;
        self.started_at = Some(at);
        self
    }

    pub fn succeeded(mut self, at: DateTime<Utc>, outputs: Vec<String>) -> Self {
        self.status = InstanceStatus::Succeeded;
        self.ended_at = Some(at);
        self.outputs = outputs;
        self
    }

    pub fn failed(mut self, at: DateTime<Utc>, error: impl Into<String>) -> Self {
        self.status = InstanceStatus::Failed;
        self.ended_at = Some(at);
        self.error = Some(error.into());
        self
    }

    /// Fold a later update for the same instance into this entry.
    ///
    /// Fields set in `later` replace ours. The status never moves backwards.
    pub fn merge(&mut self, later: FunctionInstanceLogEntry) {
        if !later.function.is_empty() {
            self.function = later.function;
        }
        self.reason = later.reason;
        self.status = self.status.max(later.status);
        if later.started_at.is_some() {
            self.started_at = later.started_at;
        }
        if later.ended_at.is_some() {
            self.ended_at = later.ended_at;
        }
        if later.error.is_some() {
            self.error = later.error;
        }
        if !later.outputs.is_empty() {
            self.outputs = later.outputs;
        }
    }
}

/// The most recent instance entries, oldest evicted first.
#[derive(Debug)]
pub struct InstanceLog {
    entries: IndexMap<Uuid, FunctionInstanceLogEntry>,
    capacity: usize,
}

impl Default for InstanceLog {
    fn default() -> Self {
        Self::with_capacity(1024)
    }
}

impl InstanceLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Insert `entry` or merge it into the entry with the same id.
    pub fn update(&mut self, entry: FunctionInstanceLogEntry) {
        match self.entries.get_mut(&entry.id) {
            Some(existing) => existing.merge(entry),
            None => {
                self.entries.insert(entry.id, entry);
                while self.entries.len() > self.capacity {
                    self.entries.shift_remove_index(0);
                }
            }
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<&FunctionInstanceLogEntry> {
        self.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionInstanceLogEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
