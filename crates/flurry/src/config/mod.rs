//! Configuration for the flurry host.

mod function_key;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub use flurry_core::config::{ConfigPath, Mergeable, MetricsConfig, interpolate, load_from_paths};
pub use function_key::FunctionKey;

use crate::blob::BlobPathPattern;
use crate::queue::QueueListenerOptions;
use flurry_core::error::ConfigError;

fn default_storage_url() -> String {
    "./storage".to_string()
}

fn default_account() -> String {
    "devstore".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_hours_window() -> u32 {
    2
}

/// Storage account the host listens on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// `memory://`, a `file://` URL or a local path.
    #[serde(default = "default_storage_url")]
    pub url: String,
    /// Account name recorded in activity log lines.
    #[serde(default = "default_account")]
    pub account: String,
    /// Tail the account's activity log in addition to scanning.
    #[serde(default = "default_true")]
    pub activity_log: bool,
    /// Hours of log files read on each poll.
    #[serde(default = "default_log_hours_window")]
    pub log_hours_window: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: default_storage_url(),
            account: default_account(),
            activity_log: true,
            log_hours_window: default_log_hours_window(),
        }
    }
}

fn default_interval_secs() -> u64 {
    2
}

fn default_rescan_interval_secs() -> Option<u64> {
    Some(30)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollingConfig {
    /// Delay between scheduler ticks.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Random extra delay, up to this many seconds, added to each tick.
    #[serde(default)]
    pub jitter_secs: u64,
    /// Rescan every container this often. `null` or `0` keeps only the
    /// startup scan, which needs the activity log to find later writes.
    #[serde(default = "default_rescan_interval_secs")]
    pub rescan_interval_secs: Option<u64>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            jitter_secs: 0,
            rescan_interval_secs: default_rescan_interval_secs(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn rescan_interval(&self) -> Option<Duration> {
        self.rescan_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

fn default_batch_size() -> usize {
    16
}

fn default_max_dequeue_count() -> u32 {
    5
}

fn default_visibility_timeout_secs() -> u64 {
    600
}

fn default_min_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_secs() -> u64 {
    60
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueuesConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_dequeue_count")]
    pub max_dequeue_count: u32,
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    #[serde(default = "default_min_backoff_ms")]
    pub min_backoff_ms: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_dequeue_count: default_max_dequeue_count(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            min_backoff_ms: default_min_backoff_ms(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

impl QueuesConfig {
    pub fn listener_options(&self) -> QueueListenerOptions {
        QueueListenerOptions {
            batch_size: self.batch_size,
            max_dequeue_count: self.max_dequeue_count,
            visibility_timeout: Duration::from_secs(self.visibility_timeout_secs),
            min_backoff: Duration::from_millis(self.min_backoff_ms),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
        }
    }
}

fn default_init_timeout_secs() -> u64 {
    30
}

fn default_invocation_timeout_secs() -> u64 {
    300
}

fn default_max_concurrent_invocations() -> usize {
    8
}

/// Out-of-process worker that runs function code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,
    #[serde(default = "default_invocation_timeout_secs")]
    pub invocation_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_invocations")]
    pub max_concurrent_invocations: usize,
}

impl WorkerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            init_timeout_secs: default_init_timeout_secs(),
            invocation_timeout_secs: default_invocation_timeout_secs(),
            max_concurrent_invocations: default_max_concurrent_invocations(),
        }
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs)
    }
}

/// What makes a function run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Blobs matching a `container/{name}` template.
    Blob { path: String },
    Queue { queue: String },
    Timer { interval_secs: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionConfig {
    pub trigger: TriggerConfig,
    /// Blob templates this function writes, resolved with the trigger's parameters.
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub disabled: bool,
}

/// Main configuration for the host.
///
/// # Example
///
/// ```yaml
/// storage:
///   url: /var/lib/flurry
///
/// worker:
///   command: node
///   args: [worker.js]
///
/// functions:
///   convert:
///     trigger:
///       type: blob
///       path: input/{name}.csv
///     outputs:
///       - output/{name}.json
///   orders:
///     trigger:
///       type: queue
///       queue: orders
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub queues: QueuesConfig,
    #[serde(default)]
    pub worker: Option<WorkerConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub functions: IndexMap<FunctionKey, FunctionConfig>,
}

impl Mergeable for HostConfig {
    type Key = FunctionKey;
    type Component = FunctionConfig;

    fn components_mut(&mut self) -> &mut IndexMap<Self::Key, Self::Component> {
        &mut self.functions
    }

    fn merge_sections(&mut self, other: Self) {
        if other.storage != StorageConfig::default() {
            self.storage = other.storage;
        }
        if other.polling != PollingConfig::default() {
            self.polling = other.polling;
        }
        if other.queues != QueuesConfig::default() {
            self.queues = other.queues;
        }
        if other.worker.is_some() {
            self.worker = other.worker;
        }
        self.metrics.merge_from(other.metrics);
    }

    fn parse_yaml(contents: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(contents).map_err(|source| ConfigError::YamlParse { source })
    }
}

impl HostConfig {
    /// Load configuration from multiple paths (files or directories).
    pub fn from_paths(paths: &[ConfigPath]) -> Result<Self, ConfigError> {
        let config: Self = load_from_paths(paths)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let result = interpolate(contents);
        if !result.is_ok() {
            return Err(ConfigError::EnvInterpolation {
                message: result.errors.join("\n"),
            });
        }

        let config = Self::parse_yaml(&result.text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Checks:
    /// - Blob trigger and output templates parse
    /// - Outputs only use parameters bound by the trigger, and differ from it
    /// - Queue names are non-empty and timer intervals positive
    /// - A worker command is set when any function is configured
    /// - Blob triggers have a way to see writes made after startup
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, function) in &self.functions {
            let name = key.id();
            match &function.trigger {
                TriggerConfig::Blob { path } => {
                    let trigger = parse_pattern(name, path)?;
                    let bound: Vec<&str> = trigger.parameter_names().collect();
                    for output in &function.outputs {
                        let output_pattern = parse_pattern(name, output)?;
                        if let Some(parameter) =
                            output_pattern.parameter_names().find(|p| !bound.contains(p))
                        {
                            return Err(ConfigError::UnboundOutputParameter {
                                function: name.to_string(),
                                output: output.clone(),
                                parameter: parameter.to_string(),
                            });
                        }
                        if output_pattern == trigger {
                            return Err(ConfigError::OutputIsInput {
                                function: name.to_string(),
                                output: output.clone(),
                            });
                        }
                    }
                }
                TriggerConfig::Queue { queue } => {
                    if queue.trim().is_empty() {
                        return Err(ConfigError::EmptyQueueName {
                            function: name.to_string(),
                        });
                    }
                    validate_outputs(name, &function.outputs)?;
                }
                TriggerConfig::Timer { interval_secs } => {
                    if *interval_secs == 0 {
                        return Err(ConfigError::InvalidTimerInterval {
                            function: name.to_string(),
                        });
                    }
                    validate_outputs(name, &function.outputs)?;
                }
            }
        }

        let has_worker = self
            .worker
            .as_ref()
            .is_some_and(|w| !w.command.trim().is_empty());
        if !self.functions.is_empty() && !has_worker {
            return Err(ConfigError::MissingWorkerCommand);
        }

        let has_blob_trigger = self
            .enabled_functions()
            .any(|(_, f)| matches!(f.trigger, TriggerConfig::Blob { .. }));
        if has_blob_trigger
            && !self.storage.activity_log
            && self.polling.rescan_interval().is_none()
        {
            return Err(ConfigError::NoBlobDiscovery);
        }

        Ok(())
    }

    /// Enabled functions in configuration order.
    pub fn enabled_functions(&self) -> impl Iterator<Item = (&FunctionKey, &FunctionConfig)> {
        self.functions.iter().filter(|(_, f)| !f.disabled)
    }
}

fn parse_pattern(function: &str, pattern: &str) -> Result<BlobPathPattern, ConfigError> {
    BlobPathPattern::parse(pattern).map_err(|e| ConfigError::InvalidPattern {
        function: function.to_string(),
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// Outputs of functions without a blob trigger have nothing to bind, so they
/// must be plain paths.
fn validate_outputs(function: &str, outputs: &[String]) -> Result<(), ConfigError> {
    for output in outputs {
        let pattern = parse_pattern(function, output)?;
        if let Some(parameter) = pattern.parameter_names().next() {
            return Err(ConfigError::UnboundOutputParameter {
                function: function.to_string(),
                output: output.clone(),
                parameter: parameter.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
worker:
  command: node
  args: [worker.js]
functions:
  convert:
    trigger:
      type: blob
      path: input/{name}.csv
    outputs:
      - output/{name}.json
  orders:
    trigger:
      type: queue
      queue: orders
  tick:
    trigger:
      type: timer
      interval_secs: 60
    disabled: true
"#;

    #[test]
    fn test_parse_defaults() {
        let config = HostConfig::parse(BASE).unwrap();
        assert_eq!(config.functions.len(), 3);
        assert_eq!(config.storage, StorageConfig::default());
        assert_eq!(config.polling.interval(), Duration::from_secs(2));
        assert_eq!(config.polling.rescan_interval(), Some(Duration::from_secs(30)));

        let worker = config.worker.as_ref().unwrap();
        assert_eq!(worker.args, vec!["worker.js"]);
        assert_eq!(worker.invocation_timeout(), Duration::from_secs(300));

        let enabled: Vec<_> = config.enabled_functions().map(|(k, _)| k.id()).collect();
        assert_eq!(enabled, vec!["convert", "orders"]);

        let options = config.queues.listener_options();
        assert_eq!(options.batch_size, 16);
        assert_eq!(options.min_backoff, Duration::from_millis(100));
    }

    #[test]
    fn test_unbound_output_parameter_rejected() {
        let yaml = r#"
worker: { command: node }
functions:
  convert:
    trigger: { type: blob, path: "input/{name}.csv" }
    outputs: ["output/{other}.json"]
"#;
        let err = HostConfig::parse(yaml).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnboundOutputParameter { ref parameter, .. } if parameter == "other"
        ));
    }

    #[test]
    fn test_output_equal_to_input_rejected() {
        let yaml = r#"
worker: { command: node }
functions:
  convert:
    trigger: { type: blob, path: "input/{name}.csv" }
    outputs: ["Input/{name}.csv"]
"#;
        assert!(matches!(
            HostConfig::parse(yaml).unwrap_err(),
            ConfigError::OutputIsInput { .. }
        ));
    }

    #[test]
    fn test_invalid_triggers_rejected() {
        let bad_pattern = r#"
worker: { command: node }
functions:
  f:
    trigger: { type: blob, path: "{container}/x" }
"#;
        assert!(matches!(
            HostConfig::parse(bad_pattern).unwrap_err(),
            ConfigError::InvalidPattern { .. }
        ));

        let empty_queue = r#"
worker: { command: node }
functions:
  f:
    trigger: { type: queue, queue: " " }
"#;
        assert!(matches!(
            HostConfig::parse(empty_queue).unwrap_err(),
            ConfigError::EmptyQueueName { .. }
        ));

        let zero_timer = r#"
worker: { command: node }
functions:
  f:
    trigger: { type: timer, interval_secs: 0 }
"#;
        assert!(matches!(
            HostConfig::parse(zero_timer).unwrap_err(),
            ConfigError::InvalidTimerInterval { .. }
        ));
    }

    #[test]
    fn test_worker_required_with_functions() {
        let yaml = r#"
functions:
  f:
    trigger: { type: queue, queue: orders }
"#;
        assert!(matches!(
            HostConfig::parse(yaml).unwrap_err(),
            ConfigError::MissingWorkerCommand
        ));
        assert!(HostConfig::parse("storage: { url: 'memory://' }").is_ok());
    }

    #[test]
    fn test_blob_triggers_need_a_discovery_source() {
        let yaml = |storage: &str, polling: &str| {
            format!(
                r#"
storage: {storage}
polling: {polling}
worker: {{ command: node }}
functions:
  f:
    trigger: {{ type: blob, path: "input/{{name}}" }}
"#
            )
        };

        let err = HostConfig::parse(&yaml("{ activity_log: false }", "{ rescan_interval_secs: null }"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoBlobDiscovery));
        let err = HostConfig::parse(&yaml("{ activity_log: false }", "{ rescan_interval_secs: 0 }"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoBlobDiscovery));

        assert!(HostConfig::parse(&yaml("{ activity_log: false }", "{}")).is_ok());
        assert!(HostConfig::parse(&yaml("{ activity_log: true }", "{ rescan_interval_secs: null }")).is_ok());
    }

    #[test]
    fn test_merge_sections() {
        let mut base = HostConfig::parse(BASE).unwrap();
        let other = HostConfig::parse_yaml(
            r#"
polling:
  interval_secs: 5
  rescan_interval_secs: 120
metrics:
  address: "127.0.0.1:9999"
"#,
        )
        .unwrap();
        base.merge(other).unwrap();

        assert_eq!(base.polling.interval_secs, 5);
        assert_eq!(base.polling.rescan_interval(), Some(Duration::from_secs(120)));
        assert_eq!(base.metrics.address, "127.0.0.1:9999");
        assert_eq!(base.worker.as_ref().unwrap().command, "node");
        assert_eq!(base.storage, StorageConfig::default());
    }

    #[test]
    fn test_duplicate_functions_rejected() {
        let mut base = HostConfig::parse(BASE).unwrap();
        let again = HostConfig::parse(BASE).unwrap();
        assert!(matches!(
            base.merge(again).unwrap_err(),
            ConfigError::DuplicateComponents { .. }
        ));
    }
}
