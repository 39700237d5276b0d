//! Queues stored as objects under `$queues/<queue>/`.
//!
//! Message keys sort by insertion time. Visibility timeouts and dequeue
//! counts are tracked by this process only.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use object_store::path::Path;
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{QueueMessage, QueueStore, StorageProviderRef};
use crate::error::{SerializeSnafu, StorageError};

/// Root of all queues in an account.
pub const QUEUE_ROOT: &str = "$queues";

#[derive(Debug, Default)]
struct Lease {
    dequeue_count: u32,
    invisible_until: Option<Instant>,
}

/// [`QueueStore`] over a storage account.
pub struct StoreQueue {
    storage: StorageProviderRef,
    leases: Mutex<HashMap<String, Lease>>,
}

impl std::fmt::Debug for StoreQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StoreQueue<{}>", self.storage.canonical_url())
    }
}

fn message_key(queue: &str, id: &str) -> Path {
    Path::from(format!("{QUEUE_ROOT}/{queue}/{id}.msg"))
}

impl StoreQueue {
    pub fn new(storage: StorageProviderRef) -> Self {
        Self {
            storage,
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Try to lease `key`, returning the new dequeue count.
    fn lease(&self, key: &str, visibility_timeout: Duration) -> Option<u32> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        let lease = leases.entry(key.to_string()).or_default();
        let now = Instant::now();
        if lease.invisible_until.is_some_and(|until| until > now) {
            return None;
        }
        lease.dequeue_count += 1;
        lease.invisible_until = Some(now + visibility_timeout);
        Some(lease.dequeue_count)
    }

    fn forget(&self, key: &str) {
        self.leases
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

#[async_trait]
impl QueueStore for StoreQueue {
    async fn get_message(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<QueueMessage>, StorageError> {
        let mut keys: Vec<String> = self
            .storage
            .list(&Path::from(format!("{QUEUE_ROOT}/{queue}")))
            .await?
            .into_iter()
            .map(|meta| meta.location.to_string())
            .filter(|key| key.ends_with(".msg"))
            .collect();
        keys.sort();

        for key in keys {
            let Some(dequeue_count) = self.lease(&key, visibility_timeout) else {
                continue;
            };
            let content = match self.storage.get(&Path::from(key.as_str())).await {
                Ok(content) => content,
                Err(e) if e.is_not_found() => {
                    self.forget(&key);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let mut message: QueueMessage = match serde_json::from_slice(&content) {
                Ok(message) => message,
                Err(e) => {
                    debug!(key = %key, error = %e, "Skipping unreadable queue message");
                    continue;
                }
            };
            message.dequeue_count = dequeue_count;
            return Ok(Some(message));
        }

        Ok(None)
    }

    async fn delete_message(&self, message: &QueueMessage) -> Result<(), StorageError> {
        let key = message_key(&message.queue, &message.id);
        match self.storage.delete(&key).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.forget(key.as_ref());
        Ok(())
    }

    async fn add_message(&self, queue: &str, content: String) -> Result<QueueMessage, StorageError> {
        let inserted_at = Utc::now();
        let id = format!(
            "{:020}-{}",
            inserted_at.timestamp_micros().max(0),
            uuid::Uuid::new_v4().simple()
        );
        let message = QueueMessage {
            id,
            queue: queue.to_string(),
            content,
            inserted_at,
            dequeue_count: 0,
        };
        let body = serde_json::to_vec(&message).context(SerializeSnafu)?;
        self.storage
            .put(&message_key(queue, &message.id), Bytes::from(body))
            .await?;
        Ok(message)
    }
}
