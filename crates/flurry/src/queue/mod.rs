//! Queue triggers.

pub mod backoff;
pub mod listener;

pub use backoff::RandomizedExponentialBackoff;
pub use listener::{POISON_SUFFIX, QueueListener, QueueListenerOptions, poison_queue_name};
