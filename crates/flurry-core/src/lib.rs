//! flurry-core: Shared components for the flurry function host.
//!
//! - `storage/` - Storage account abstraction (blobs, activity log, queues)
//! - `metrics/` - Prometheus metrics infrastructure
//! - `config/` - Configuration loading and environment variable interpolation
//! - `polling` - Generic polling loop trait and runner
//! - `signal` - Signal handling for graceful shutdown
//! - `error` - Common error types

pub mod config;
pub mod error;
pub mod metrics;
pub mod polling;
pub mod signal;
pub mod storage;
pub mod tracing;

pub use config::{CliArgs, ConfigPath, Mergeable, MetricsConfig, load_from_paths};
pub use error::{ConfigError, MetricsError, SetupError, StorageError};
pub use metrics::{
    DEFAULT_METRICS_ADDR, MetricsController, Readiness, init_global as init_metrics,
    init_test as init_metrics_test,
};
pub use polling::{IterationResult, PollingProcessor, random_jitter, run_polling_loop};
pub use signal::{cancel_on_signal, shutdown_signal};
pub use storage::{
    ActivityLog, BlobAttributes, BlobItem, BlobPath, BlobStore, LogBatch, LogCursor, QueueMessage,
    QueueStore, StorageProvider, StorageProviderRef, StoreActivityLog, StoreQueue,
};
pub use self::tracing::{LogFormat, init_tracing};
