use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::BlobPath;

/// One entry of a container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobItem {
    pub path: BlobPath,
    pub uri: String,
}

/// Freshly fetched blob properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobAttributes {
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

/// Position in an activity log, held per storage client.
///
/// The position is the key of the last log file consumed. It only ever moves
/// forward.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogCursor {
    position: Option<String>,
}

impl LogCursor {
    pub fn at(position: impl Into<String>) -> Self {
        Self {
            position: Some(position.into()),
        }
    }

    pub fn position(&self) -> Option<&str> {
        self.position.as_deref()
    }

    /// True when `key` sorts after this position.
    pub fn is_before(&self, key: &str) -> bool {
        self.position.as_deref().is_none_or(|p| key > p)
    }

    /// Move to `other` if it is further along.
    pub fn advance(&mut self, other: LogCursor) {
        if let Some(next) = other.position {
            if self.is_before(&next) {
                self.position = Some(next);
            }
        }
    }
}

/// Raw log lines read from an activity log.
#[derive(Debug, Clone, Default)]
pub struct LogBatch {
    pub lines: Vec<String>,
    pub cursor: LogCursor,
}

/// A claimed queue message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: String,
    pub queue: String,
    pub content: String,
    pub inserted_at: DateTime<Utc>,
    /// Number of times the message has been handed out, including this one.
    #[serde(default)]
    pub dequeue_count: u32,
}
