//! Queue polling with poison handling and idle backoff.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use flurry_core::emit;
use flurry_core::metrics::events::{PoisonMessageMoved, QueueMessagesClaimed};
use flurry_core::{QueueMessage, QueueStore, StorageError};

use super::backoff::RandomizedExponentialBackoff;
use crate::trigger::TriggerCandidate;

/// Suffix of the queue that receives messages which keep failing.
pub const POISON_SUFFIX: &str = "-poison";

pub fn poison_queue_name(queue: &str) -> String {
    format!("{queue}{POISON_SUFFIX}")
}

/// Tuning for a [`QueueListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueListenerOptions {
    /// Maximum messages claimed per poll.
    pub batch_size: usize,
    /// A message handed out more often than this is moved to the poison queue.
    pub max_dequeue_count: u32,
    pub visibility_timeout: Duration,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for QueueListenerOptions {
    fn default() -> Self {
        Self {
            batch_size: 16,
            max_dequeue_count: 5,
            visibility_timeout: Duration::from_secs(600),
            min_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Claims messages from one queue.
pub struct QueueListener {
    store: Arc<dyn QueueStore>,
    queue: String,
    poison_queue: String,
    options: QueueListenerOptions,
    backoff: RandomizedExponentialBackoff,
    next_poll: Option<Instant>,
}

impl std::fmt::Debug for QueueListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueListener")
            .field("queue", &self.queue)
            .field("options", &self.options)
            .field("next_poll", &self.next_poll)
            .finish()
    }
}

impl QueueListener {
    pub fn new(store: Arc<dyn QueueStore>, queue: impl Into<String>, options: QueueListenerOptions) -> Self {
        let queue = queue.into();
        Self {
            store,
            poison_queue: poison_queue_name(&queue),
            backoff: RandomizedExponentialBackoff::new(options.min_backoff, options.max_backoff),
            queue,
            options,
            next_poll: None,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn poison_queue(&self) -> &str {
        &self.poison_queue
    }

    /// When the next poll will actually query the queue.
    pub fn next_poll(&self) -> Option<Instant> {
        self.next_poll
    }

    /// Claim up to `batch_size` messages and deliver them. Returns the number delivered.
    ///
    /// Does nothing while backing off. Storage errors are logged and count as
    /// an empty poll.
    pub async fn poll(
        &mut self,
        cancel: &CancellationToken,
        mut callback: impl FnMut(TriggerCandidate) + Send,
    ) -> usize {
        if self.next_poll.is_some_and(|at| Instant::now() < at) {
            return 0;
        }

        let mut claimed = 0;
        let mut delivered = 0;
        for _ in 0..self.options.batch_size.max(1) {
            if cancel.is_cancelled() {
                break;
            }
            let message = match self
                .store
                .get_message(&self.queue, self.options.visibility_timeout)
                .await
            {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    warn!(queue = %self.queue, error = %e, "Failed to get queue message");
                    break;
                }
            };
            claimed += 1;

            if message.dequeue_count > self.options.max_dequeue_count {
                if let Err(e) = self.move_to_poison(&message).await {
                    warn!(queue = %self.queue, message_id = %message.id, error = %e, "Failed to move poison message");
                }
                continue;
            }

            callback(TriggerCandidate::queue(message));
            delivered += 1;
        }

        if claimed > 0 {
            emit!(QueueMessagesClaimed {
                queue: self.queue.clone(),
                count: claimed as u64,
            });
        }
        let delay = self.backoff.next_delay(claimed > 0);
        self.next_poll = if claimed > 0 {
            None
        } else {
            Some(Instant::now() + delay)
        };
        delivered
    }

    /// Settle a delivered message. Only successful runs delete it; a failed
    /// message reappears once its visibility timeout lapses.
    pub async fn complete(&self, message: &QueueMessage, succeeded: bool) -> Result<(), StorageError> {
        if succeeded {
            self.store.delete_message(message).await
        } else {
            debug!(
                queue = %self.queue,
                message_id = %message.id,
                dequeue_count = message.dequeue_count,
                "Leaving failed message for retry"
            );
            Ok(())
        }
    }

    async fn move_to_poison(&self, message: &QueueMessage) -> Result<(), StorageError> {
        warn!(
            queue = %self.queue,
            message_id = %message.id,
            max_dequeue_count = self.options.max_dequeue_count,
            poison_queue = %self.poison_queue,
            "Message reached max dequeue count, moving to poison queue"
        );
        self.store
            .add_message(&self.poison_queue, message.content.clone())
            .await?;
        self.store.delete_message(message).await?;
        emit!(PoisonMessageMoved {
            queue: self.queue.clone(),
        });
        Ok(())
    }
}
