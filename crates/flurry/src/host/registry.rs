//! Functions known to the host and what triggers them.

use indexmap::IndexMap;
use snafu::prelude::*;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::warn;

use flurry_core::BlobPath;

use crate::blob::BlobPathPattern;
use crate::config::{FunctionKey, HostConfig, TriggerConfig};
use crate::error::{HostError, PatternSnafu};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerBinding {
    Blob(BlobPathPattern),
    Queue(String),
    Timer(Duration),
}

#[derive(Debug, Clone)]
pub struct FunctionDescriptor {
    pub key: FunctionKey,
    pub trigger: TriggerBinding,
    pub outputs: Vec<BlobPathPattern>,
    /// The trigger as configured, sent to the worker on load.
    pub trigger_config: TriggerConfig,
}

impl FunctionDescriptor {
    pub fn id(&self) -> &str {
        self.key.id()
    }

    /// True when `path` matches one of the declared output templates.
    pub fn declares_output(&self, path: &BlobPath) -> bool {
        self.outputs.iter().any(|output| output.matches(path).is_some())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: IndexMap<FunctionKey, FunctionDescriptor>,
}

impl FunctionRegistry {
    /// Descriptors for every enabled function in `config`.
    pub fn from_config(config: &HostConfig) -> Result<Self, HostError> {
        let mut functions = IndexMap::new();
        for (key, function) in config.enabled_functions() {
            let trigger = match &function.trigger {
                TriggerConfig::Blob { path } => {
                    TriggerBinding::Blob(BlobPathPattern::parse(path).context(PatternSnafu)?)
                }
                TriggerConfig::Queue { queue } => TriggerBinding::Queue(queue.clone()),
                TriggerConfig::Timer { interval_secs } => {
                    TriggerBinding::Timer(Duration::from_secs(*interval_secs))
                }
            };
            let outputs = function
                .outputs
                .iter()
                .map(|output| BlobPathPattern::parse(output).context(PatternSnafu))
                .collect::<Result<Vec<_>, _>>()?;

            functions.insert(
                key.clone(),
                FunctionDescriptor {
                    key: key.clone(),
                    trigger,
                    outputs,
                    trigger_config: function.trigger.clone(),
                },
            );
        }
        Ok(Self { functions })
    }

    pub fn insert(&mut self, descriptor: FunctionDescriptor) {
        self.functions.insert(descriptor.key.clone(), descriptor);
    }

    pub fn get(&self, key: &FunctionKey) -> Option<&FunctionDescriptor> {
        self.functions.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionDescriptor> {
        self.functions.values()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Remove a function the worker refused to load.
    pub fn disable(&mut self, key: &FunctionKey) -> Option<FunctionDescriptor> {
        let removed = self.functions.shift_remove(key);
        if removed.is_some() {
            warn!(function = %key, "Function disabled");
        }
        removed
    }

    /// Blob-triggered functions listening on `container`.
    pub fn blob_functions<'a>(
        &'a self,
        container: &'a str,
    ) -> impl Iterator<Item = (&'a FunctionDescriptor, &'a BlobPathPattern)> + 'a {
        self.functions.values().filter_map(move |f| match &f.trigger {
            TriggerBinding::Blob(pattern) if pattern.container() == container => Some((f, pattern)),
            _ => None,
        })
    }

    /// Every container some function listens on.
    pub fn containers(&self) -> BTreeSet<String> {
        self.functions
            .values()
            .filter_map(|f| match &f.trigger {
                TriggerBinding::Blob(pattern) => Some(pattern.container().to_string()),
                _ => None,
            })
            .collect()
    }

    pub fn queue_functions(&self) -> impl Iterator<Item = (&FunctionDescriptor, &str)> {
        self.functions.values().filter_map(|f| match &f.trigger {
            TriggerBinding::Queue(queue) => Some((f, queue.as_str())),
            _ => None,
        })
    }

    pub fn timer_functions(&self) -> impl Iterator<Item = (&FunctionDescriptor, Duration)> {
        self.functions.values().filter_map(|f| match &f.trigger {
            TriggerBinding::Timer(interval) => Some((f, *interval)),
            _ => None,
        })
    }
}
