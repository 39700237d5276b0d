//! Host lifecycle: wiring storage, the worker and the listeners together.
//!
//! - `context`: explicit host state and the shutdown token
//! - `registry`: functions and their trigger bindings
//! - `invoker`: worker handshake and invocation dispatch
//! - `instance`: per-instance status records
//! - `scheduler`: the polling processor that ties it all together

pub mod context;
pub mod instance;
pub mod invoker;
pub mod registry;
pub mod scheduler;

pub use context::{HostContext, HostState};
pub use instance::{FunctionInstanceLogEntry, InstanceLog, InstanceStatus};
pub use invoker::{FunctionInvoker, WorkerInvoker};
pub use registry::{FunctionDescriptor, FunctionRegistry, TriggerBinding};
pub use scheduler::{BLOB_POISON_QUEUE, PendingInvocation, SchedulerOptions, TriggerScheduler};

use async_trait::async_trait;
use snafu::prelude::*;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use flurry_core::error::{AddressParseSnafu, MetricsSnafu};
use flurry_core::{
    ActivityLog, StorageError, StorageProvider, StoreActivityLog, StoreQueue, cancel_on_signal,
    init_metrics, run_polling_loop,
};

use crate::blob::BlobListener;
use crate::config::{HostConfig, WorkerConfig};
use crate::error::{HostError, InvocationError, NotLoadedSnafu, SetupSnafu, StorageSnafu};
use crate::rpc::message::{InvocationRequest, InvocationResponse};
use crate::rpc::{WorkerChannel, WorkerProcess};

/// Run the host until a shutdown signal arrives.
pub async fn run_host(config: HostConfig) -> Result<(), HostError> {
    let addr: std::net::SocketAddr = config
        .metrics
        .address
        .parse()
        .context(AddressParseSnafu)
        .context(SetupSnafu)?;
    let shutdown = CancellationToken::new();
    let context = Arc::new(HostContext::with_shutdown(
        uuid::Uuid::new_v4().to_string(),
        shutdown.clone(),
    ));
    let ready = context.clone();
    init_metrics(addr, Arc::new(move || ready.is_ready()))
        .context(MetricsSnafu)
        .context(SetupSnafu)?;
    cancel_on_signal(shutdown.clone());

    let storage = Arc::new(
        StorageProvider::for_url(&config.storage.url)
            .await
            .context(StorageSnafu)?,
    );
    info!(storage = %storage.canonical_url(), "Opened storage account");

    let mut registry = FunctionRegistry::from_config(&config)?;
    if registry.is_empty() {
        warn!("No functions are enabled");
    }

    let mut options = SchedulerOptions {
        queue: config.queues.listener_options(),
        ..Default::default()
    };
    let worker = match &config.worker {
        Some(worker_config) if !registry.is_empty() => {
            options.max_concurrent_invocations = worker_config.max_concurrent_invocations;
            Some(start_worker(worker_config, &mut registry).await?)
        }
        _ => None,
    };

    let mut log_clients: Vec<Result<Arc<dyn ActivityLog>, StorageError>> = Vec::new();
    if config.storage.activity_log {
        let log = StoreActivityLog::connect(
            storage.clone(),
            config.storage.account.clone(),
            config.storage.log_hours_window,
        )
        .await;
        log_clients.push(log.map(|log| Arc::new(log) as Arc<dyn ActivityLog>));
    }
    let blobs = BlobListener::new(storage.clone(), registry.containers())
        .with_log_clients(log_clients)
        .with_rescan_interval(config.polling.rescan_interval());

    let invoker: Arc<dyn FunctionInvoker> = match &worker {
        Some((_, invoker)) => invoker.clone(),
        None => Arc::new(NoWorker),
    };
    let mut scheduler = TriggerScheduler::new(
        context.clone(),
        registry,
        blobs,
        storage.clone(),
        Arc::new(StoreQueue::new(storage.clone())),
        invoker,
        options,
    );

    context.mark_ready();
    info!(
        host = %context.host_id(),
        functions = scheduler.registry().len(),
        "Host started"
    );

    let result = run_polling_loop(
        &mut scheduler,
        config.polling.interval(),
        config.polling.jitter_secs,
        shutdown,
        "host",
    )
    .await;

    context.stop();
    scheduler.shutdown().await;
    if let Some((process, invoker)) = worker {
        invoker.channel().close();
        process.shutdown().await;
    }
    info!("Host stopped");
    result
}

async fn start_worker(
    config: &WorkerConfig,
    registry: &mut FunctionRegistry,
) -> Result<(WorkerProcess, Arc<WorkerInvoker>), HostError> {
    let (process, channel) = WorkerProcess::spawn(config)?;
    let channel = Arc::new(WorkerChannel::new(channel));
    let invoker = WorkerInvoker::connect(channel, config, registry).await?;
    Ok((process, Arc::new(invoker)))
}

/// Invoker used when no function needs a worker.
struct NoWorker;

#[async_trait]
impl FunctionInvoker for NoWorker {
    async fn invoke(
        &self,
        request: InvocationRequest,
    ) -> Result<InvocationResponse, InvocationError> {
        NotLoadedSnafu {
            function: request.function_id,
        }
        .fail()
    }
}
