//! Error types for the flurry host.

use snafu::prelude::*;
use std::time::Duration;

pub use flurry_core::error::{ConfigError, SetupError, StorageError};

/// Errors from parsing or applying a blob path template.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PatternError {
    #[snafu(display("Blob path template '{pattern}' must be 'container/blob'"))]
    MissingBlobName { pattern: String },

    #[snafu(display("Container '{container}' cannot contain parameters"))]
    ParameterInContainer { container: String },

    #[snafu(display("Unclosed '{{' in '{pattern}'"))]
    UnclosedParameter { pattern: String },

    #[snafu(display("Unexpected '}}' in '{pattern}'"))]
    UnopenedParameter { pattern: String },

    #[snafu(display("Invalid parameter name '{name}' in '{pattern}'"))]
    InvalidParameterName { pattern: String, name: String },

    #[snafu(display("Parameters '{{{first}}}' and '{{{second}}}' need a literal between them"))]
    AdjacentParameters { first: String, second: String },

    #[snafu(display("Parameter '{{{name}}}' appears more than once in '{pattern}'"))]
    DuplicateParameter { pattern: String, name: String },

    #[snafu(display("No value bound for '{{{name}}}' in '{pattern}'"))]
    UnboundParameter { pattern: String, name: String },

    #[snafu(display("Resolved path '{path}' is invalid: {source}"))]
    InvalidResolvedPath { path: String, source: StorageError },

    #[snafu(display("Failed to compile template '{pattern}': {source}"))]
    Compile {
        pattern: String,
        source: regex::Error,
    },
}

/// Errors from the worker RPC channel.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RpcError {
    /// No response arrived before the call's deadline.
    #[snafu(display("{message_type} {request_id} timed out after {timeout:?}"))]
    Timeout {
        request_id: String,
        message_type: &'static str,
        timeout: Duration,
    },

    /// The stream to the worker closed while the call was pending.
    #[snafu(display("Channel to worker '{worker}' closed"))]
    ChannelClosed { worker: String },

    /// The call was failed from outside before it completed.
    #[snafu(display("Request {request_id} was cancelled"))]
    Cancelled { request_id: String },

    /// The worker answered with an explicit failure.
    #[snafu(display("Worker failed: {message}"))]
    Worker {
        message: String,
        stack_trace: Option<String>,
    },

    /// The worker answered with a different message type than expected.
    #[snafu(display("Expected {expected} but worker sent {actual}"))]
    UnexpectedMessage {
        expected: &'static str,
        actual: String,
    },

    #[snafu(display("Failed to encode {message_type}: {source}"))]
    Encode {
        message_type: &'static str,
        source: serde_json::Error,
    },

    #[snafu(display("Failed to decode {message_type}: {source}"))]
    Decode {
        message_type: &'static str,
        source: serde_json::Error,
    },
}

impl RpcError {
    /// True when the worker never answered, as opposed to answering with an error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout { .. })
    }

    /// True when the call failed for transport reasons and may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcError::Timeout { .. } | RpcError::ChannelClosed { .. } | RpcError::Cancelled { .. }
        )
    }
}

/// Errors from a single function invocation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum InvocationError {
    #[snafu(display("Function '{function}' is not loaded by the worker"))]
    NotLoaded { function: String },

    #[snafu(display("Invocation of '{function}' failed: {source}"))]
    Rpc { function: String, source: RpcError },

    #[snafu(display("Failed to read input {path}: {source}"))]
    ReadInput { path: String, source: StorageError },

    #[snafu(display("Failed to write output {path}: {source}"))]
    WriteOutput { path: String, source: StorageError },

    #[snafu(display("Function '{function}' returned output {path} it does not declare"))]
    UndeclaredOutput { function: String, path: String },
}

impl InvocationError {
    pub fn is_retryable(&self) -> bool {
        match self {
            InvocationError::Rpc { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Errors that stop the host.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum HostError {
    #[snafu(display("Host setup failed: {source}"))]
    Setup { source: SetupError },

    #[snafu(display("Storage error: {source}"))]
    Storage { source: StorageError },

    #[snafu(display("Failed to start worker '{command}': {source}"))]
    WorkerSpawn {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("Worker initialization failed: {source}"))]
    WorkerInit { source: RpcError },

    #[snafu(display("Invalid blob path template: {source}"))]
    Pattern { source: PatternError },
}
