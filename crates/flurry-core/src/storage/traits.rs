//! Storage collaborators consumed by the listeners.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use super::{BlobAttributes, BlobItem, BlobPath, LogBatch, LogCursor, QueueMessage};
use crate::error::StorageError;

/// Container-scoped blob operations.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Flat listing of every blob in `container`.
    ///
    /// Returns `None` when the container does not exist.
    async fn list_blobs(&self, container: &str) -> Result<Option<Vec<BlobItem>>, StorageError>;

    /// Fetch fresh properties, or `None` if the blob no longer exists.
    async fn fetch_attributes(
        &self,
        blob: &BlobPath,
    ) -> Result<Option<BlobAttributes>, StorageError>;

    /// Create `container` if it is missing. Idempotent.
    async fn create_container_if_missing(&self, container: &str) -> Result<(), StorageError>;

    async fn read_blob(&self, blob: &BlobPath) -> Result<Bytes, StorageError>;

    async fn write_blob(&self, blob: &BlobPath, content: Bytes) -> Result<(), StorageError>;
}

/// The storage service's write-activity log for one client.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    /// Identity of the account and credentials this log belongs to.
    fn client_id(&self) -> &str;

    /// Raw log lines written after `cursor`, and the cursor to use next time.
    async fn read_since(&self, cursor: &LogCursor) -> Result<LogBatch, StorageError>;
}

/// Message queue operations.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Claim the oldest visible message, hiding it for `visibility_timeout`.
    async fn get_message(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<QueueMessage>, StorageError>;

    /// Remove a claimed message. Deleting a message that is already gone succeeds.
    async fn delete_message(&self, message: &QueueMessage) -> Result<(), StorageError>;

    async fn add_message(&self, queue: &str, content: String) -> Result<QueueMessage, StorageError>;
}
