//! Dispatching invocations to the worker.

use async_trait::async_trait;
use snafu::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{FunctionKey, WorkerConfig};
use crate::error::{
    HostError, InvocationError, NotLoadedSnafu, RpcError, RpcSnafu, WorkerInitSnafu,
};
use crate::rpc::message::{
    FunctionLoadRequest, InvocationCancel, InvocationRequest, InvocationResponse,
    WorkerInitRequest,
};
use crate::rpc::WorkerChannel;

use super::registry::FunctionRegistry;

/// Runs one invocation to completion.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, request: InvocationRequest)
    -> Result<InvocationResponse, InvocationError>;
}

/// [`FunctionInvoker`] backed by a worker channel.
#[derive(Debug)]
pub struct WorkerInvoker {
    channel: Arc<WorkerChannel>,
    timeout: Duration,
    loaded: HashSet<String>,
}

impl WorkerInvoker {
    /// Initialize the worker and load every function in `registry`.
    ///
    /// Functions the worker refuses are removed from `registry`. Fails only
    /// when the worker does not answer the init request in time.
    pub async fn connect(
        channel: Arc<WorkerChannel>,
        config: &WorkerConfig,
        registry: &mut FunctionRegistry,
    ) -> Result<Self, HostError> {
        let init = channel
            .send(
                &WorkerInitRequest {
                    host_version: env!("CARGO_PKG_VERSION").to_string(),
                },
                config.init_timeout(),
            )
            .await
            .context(WorkerInitSnafu)?;
        info!(
            worker = %channel.worker_id(),
            worker_version = %init.worker_version,
            capabilities = init.capabilities.len(),
            "Worker initialized"
        );

        let mut loaded = HashSet::new();
        let mut refused = Vec::new();
        for function in registry.iter() {
            let trigger = match serde_json::to_value(&function.trigger_config) {
                Ok(trigger) => trigger,
                Err(e) => {
                    error!(function = %function.key, error = %e, "Failed to encode trigger");
                    refused.push(function.key.clone());
                    continue;
                }
            };
            let request = FunctionLoadRequest {
                function_id: function.id().to_string(),
                name: function.id().to_string(),
                trigger,
            };
            match channel.send(&request, config.init_timeout()).await {
                Ok(_) => {
                    debug!(function = %function.key, "Function loaded");
                    loaded.insert(function.id().to_string());
                }
                Err(e) => {
                    error!(function = %function.key, error = %e, "Worker failed to load function");
                    refused.push(function.key.clone());
                }
            }
        }
        for key in &refused {
            registry.disable(key);
        }

        Ok(Self {
            channel,
            timeout: config.invocation_timeout(),
            loaded,
        })
    }

    pub fn is_loaded(&self, function: &FunctionKey) -> bool {
        self.loaded.contains(function.id())
    }

    pub fn channel(&self) -> &Arc<WorkerChannel> {
        &self.channel
    }
}

#[async_trait]
impl FunctionInvoker for WorkerInvoker {
    async fn invoke(
        &self,
        request: InvocationRequest,
    ) -> Result<InvocationResponse, InvocationError> {
        let function = request.function_id.clone();
        ensure!(
            self.loaded.contains(&function),
            NotLoadedSnafu {
                function: function.clone()
            }
        );

        let invocation_id = request.invocation_id;
        let pending = self
            .channel
            .start(&request, self.timeout)
            .context(RpcSnafu {
                function: function.clone(),
            })?;
        let result = pending.wait().await;

        if let Err(RpcError::Timeout { .. }) = &result {
            warn!(function = %function, invocation_id = %invocation_id, "Invocation timed out, cancelling");
            if let Err(e) = self.channel.post(&InvocationCancel { invocation_id }) {
                debug!(function = %function, error = %e, "Failed to send cancellation");
            }
        }
        result.context(RpcSnafu { function })
    }
}
