//! Common error types shared across the flurry crates.
//!
//! This module defines error types for storage, configuration, metrics and
//! host setup.

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed: {source}"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },

    /// A blob or container name could not be turned into an object path.
    #[snafu(display("Invalid blob path '{path}': {message}"))]
    InvalidPath { path: String, message: String },

    /// Stored content was not valid UTF-8.
    #[snafu(display("Invalid UTF-8 in {path}: {source}"))]
    Utf8 {
        path: String,
        source: std::string::FromUtf8Error,
    },

    /// Failed to serialize a stored record.
    #[snafu(display("Failed to serialize record: {source}"))]
    Serialize { source: serde_json::Error },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            StorageError::Io { source } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file: {source}"))]
    ReadFile { source: std::io::Error },

    /// Duplicate component keys found across config files.
    #[snafu(display("Duplicate component keys: {}", keys.join(", ")))]
    DuplicateComponents { keys: Vec<String> },

    /// Unsupported config file format.
    #[snafu(display("Unsupported config format for {}: only .yaml/.yml supported", path.display()))]
    UnsupportedFormat { path: std::path::PathBuf },

    /// Failed to read configuration directory.
    #[snafu(display("Failed to read directory {}", path.display()))]
    ReadDir {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// Multiple configuration errors occurred.
    #[snafu(display("Multiple config errors:\n{}", errors.join("\n")))]
    MultipleErrors { errors: Vec<String> },

    /// A blob path template could not be parsed.
    #[snafu(display("Function '{function}' has invalid blob path '{pattern}': {message}"))]
    InvalidPattern {
        function: String,
        pattern: String,
        message: String,
    },

    /// An output template references a parameter its input never binds.
    #[snafu(display(
        "Function '{function}' output '{output}' uses unbound parameter '{{{parameter}}}'"
    ))]
    UnboundOutputParameter {
        function: String,
        output: String,
        parameter: String,
    },

    /// A function writes to the same path it is triggered by.
    #[snafu(display("Function '{function}' output '{output}' is identical to its input"))]
    OutputIsInput { function: String, output: String },

    /// Queue trigger without a queue name.
    #[snafu(display("Function '{function}' has an empty queue name"))]
    EmptyQueueName { function: String },

    /// Timer trigger with a zero interval.
    #[snafu(display("Function '{function}' timer interval must be greater than zero"))]
    InvalidTimerInterval { function: String },

    /// Functions are configured but no worker command is.
    #[snafu(display("worker.command is required when functions are configured"))]
    MissingWorkerCommand,

    /// Blob triggers with neither activity log tailing nor periodic rescans.
    #[snafu(display(
        "blob triggers need storage.activity_log or polling.rescan_interval_secs to see new blobs"
    ))]
    NoBlobDiscovery,

    /// Generic internal configuration error.
    #[snafu(display("{message}"))]
    Internal { message: String },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// Metrics server already initialized (double-init attempted).
    #[snafu(display("Metrics server already initialized"))]
    AlreadyInitialized,

    /// Metrics server not initialized (controller accessed before init).
    #[snafu(display("Metrics server not initialized"))]
    NotInitialized,
}

// ============ Setup Errors ============

/// Errors that can occur while bringing the host up (before running).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SetupError {
    /// Failed to parse metrics address.
    #[snafu(display("Failed to parse metrics address: {source}"))]
    AddressParse { source: std::net::AddrParseError },

    /// Failed to initialize metrics.
    #[snafu(display("Failed to initialize metrics: {source}"))]
    Metrics { source: MetricsError },

    /// Failed to open the storage account.
    #[snafu(display("Failed to open storage: {source}"))]
    Storage { source: StorageError },
}
