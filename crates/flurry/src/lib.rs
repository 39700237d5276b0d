//! Flurry: function host that binds storage triggers to out-of-process workers.
//!
//! This crate handles:
//! - Detecting new and changed blobs through container scans and the storage activity log
//! - Claiming queue messages with backoff and poison handling
//! - Deciding whether a blob trigger is already satisfied by its outputs
//! - Talking to worker processes over a correlated request/response channel
//! - Scheduling invocations and applying their output bindings

pub mod blob;
pub mod config;
pub mod error;
pub mod host;
pub mod queue;
pub mod rpc;
pub mod trigger;

#[cfg(test)]
mod test_support;

// Re-export commonly used items
pub use config::HostConfig;
pub use error::{HostError, InvocationError, PatternError, RpcError};
pub use host::{HostContext, HostState, TriggerScheduler, run_host};

// Re-export from flurry-core
pub use flurry_core::{
    BlobPath, CliArgs, LogFormat, StorageProvider, StorageProviderRef, init_tracing,
    shutdown_signal,
};
