//! The host's polling processor.
//!
//! Every tick polls the blob listener, the queue listeners and the timers,
//! turns accepted candidates into pending invocations, then runs them through
//! the invoker with bounded concurrency.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use indexmap::IndexMap;
use snafu::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use flurry_core::emit;
use flurry_core::metrics::events::{
    DiscoverySource, InvocationCompleted, InvocationStatus, PoisonMessageMoved,
};
use flurry_core::{BlobPath, BlobStore, IterationResult, PollingProcessor, QueueMessage, QueueStore};

use crate::blob::{Bindings, BlobListener};
use crate::config::FunctionKey;
use crate::error::{HostError, InvocationError, UndeclaredOutputSnafu, WriteOutputSnafu};
use crate::queue::{QueueListener, QueueListenerOptions};
use crate::rpc::message::{InvocationInput, InvocationRequest, InvocationResponse, OutputBinding};
use crate::trigger::{
    CandidateSource, CausalityIndex, StoreTimestampReader, TriggerCandidate, TriggerDecision,
    TriggerEvent, TriggerExecutor, TriggerReason,
};

use super::context::HostContext;
use super::instance::{FunctionInstanceLogEntry, InstanceLog};
use super::invoker::FunctionInvoker;
use super::registry::FunctionRegistry;

/// Queue receiving blob triggers that kept failing.
pub const BLOB_POISON_QUEUE: &str = "flurry-blobtrigger-poison";

/// An accepted trigger waiting for dispatch.
#[derive(Debug, Clone)]
pub struct PendingInvocation {
    pub instance: Uuid,
    pub function: FunctionKey,
    pub reason: TriggerReason,
    pub input: InvocationInput,
    pub trigger_metadata: BTreeMap<String, String>,
    /// Index of the queue listener that delivered `message`.
    queue: Option<(usize, QueueMessage)>,
}

impl PendingInvocation {
    fn request(&self) -> InvocationRequest {
        InvocationRequest {
            invocation_id: self.instance,
            function_id: self.function.id().to_string(),
            trigger_metadata: self.trigger_metadata.clone(),
            input: self.input.clone(),
        }
    }

    fn trigger_blob(&self) -> Option<&BlobPath> {
        match &self.reason {
            TriggerReason::Blob { path, .. } => Some(path),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub queue: QueueListenerOptions,
    pub max_concurrent_invocations: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            queue: QueueListenerOptions::default(),
            max_concurrent_invocations: 8,
        }
    }
}

struct QueueBinding {
    function: FunctionKey,
    listener: QueueListener,
}

struct TimerBinding {
    function: FunctionKey,
    interval: Duration,
    next_due: Option<Instant>,
}

type Finished = (
    PendingInvocation,
    Instant,
    Result<InvocationResponse, InvocationError>,
);

pub struct TriggerScheduler {
    context: Arc<HostContext>,
    registry: FunctionRegistry,
    blobs: BlobListener,
    queues: Vec<QueueBinding>,
    timers: Vec<TimerBinding>,
    executor: TriggerExecutor,
    store: Arc<dyn BlobStore>,
    queue_store: Arc<dyn QueueStore>,
    invoker: Arc<dyn FunctionInvoker>,
    causality: CausalityIndex,
    instances: InstanceLog,
    /// Failed runs per function and trigger blob since the last success.
    blob_attempts: HashMap<(FunctionKey, BlobPath), u32>,
    max_blob_attempts: u32,
    max_concurrent: usize,
}

impl std::fmt::Debug for TriggerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerScheduler")
            .field("functions", &self.registry.len())
            .field("blobs", &self.blobs)
            .field("queues", &self.queues.len())
            .field("timers", &self.timers.len())
            .field("max_concurrent", &self.max_concurrent)
            .finish()
    }
}

impl TriggerScheduler {
    /// Build a scheduler for every function in `registry`.
    ///
    /// `blobs` must already listen on the containers of the blob-triggered
    /// functions. One queue listener is created per queue-triggered function.
    pub fn new(
        context: Arc<HostContext>,
        registry: FunctionRegistry,
        blobs: BlobListener,
        store: Arc<dyn BlobStore>,
        queue_store: Arc<dyn QueueStore>,
        invoker: Arc<dyn FunctionInvoker>,
        options: SchedulerOptions,
    ) -> Self {
        let queues = registry
            .queue_functions()
            .map(|(function, queue)| QueueBinding {
                function: function.key.clone(),
                listener: QueueListener::new(queue_store.clone(), queue, options.queue.clone()),
            })
            .collect();
        let timers = registry
            .timer_functions()
            .map(|(function, interval)| TimerBinding {
                function: function.key.clone(),
                interval,
                next_due: None,
            })
            .collect();

        Self {
            context,
            registry,
            blobs,
            queues,
            timers,
            executor: TriggerExecutor::new(Arc::new(StoreTimestampReader::new(store.clone()))),
            store,
            queue_store,
            invoker,
            causality: CausalityIndex::new(),
            instances: InstanceLog::default(),
            blob_attempts: HashMap::new(),
            max_blob_attempts: options.queue.max_dequeue_count.max(1),
            max_concurrent: options.max_concurrent_invocations.max(1),
        }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn causality(&self) -> &CausalityIndex {
        &self.causality
    }

    pub fn instances(&self) -> &InstanceLog {
        &self.instances
    }

    pub fn blob_listener(&self) -> &BlobListener {
        &self.blobs
    }

    /// Stop background scans.
    pub async fn shutdown(&mut self) {
        self.blobs.shutdown().await;
    }

    /// Accepted invocations for the blobs delivered this tick.
    ///
    /// A blob delivered more than once in the same tick is evaluated once.
    async fn blob_invocations(&mut self, candidates: Vec<TriggerCandidate>) -> Vec<PendingInvocation> {
        let mut unique: IndexMap<BlobPath, DiscoverySource> = IndexMap::new();
        for candidate in candidates {
            let via = candidate.discovered_via;
            if let CandidateSource::Blob(path) = candidate.source {
                unique.entry(path).or_insert(via);
            }
        }

        let mut pending = Vec::new();
        for (path, via) in unique {
            let functions: Vec<_> = self
                .registry
                .blob_functions(path.container())
                .map(|(function, trigger)| {
                    (function.key.clone(), trigger.clone(), function.outputs.clone())
                })
                .collect();

            let mut accepted: Vec<(FunctionKey, Bindings)> = Vec::new();
            let mut retry = false;
            for (key, trigger, outputs) in &functions {
                match self.executor.evaluate(key.id(), trigger, outputs, &path).await {
                    Ok(TriggerDecision::Execute { bindings }) => {
                        accepted.push((key.clone(), bindings));
                    }
                    Ok(decision) => {
                        debug!(function = %key, blob = %path, decision = ?decision.kind(), "Not executing");
                    }
                    Err(e) => {
                        warn!(function = %key, blob = %path, error = %e, "Failed to evaluate blob trigger");
                        retry = true;
                    }
                }
            }
            if retry {
                self.blobs.notify(path.clone());
            }
            if accepted.is_empty() {
                continue;
            }

            let content = match self.store.read_blob(&path).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) if e.is_not_found() => {
                    debug!(blob = %path, "Blob disappeared before it could be read");
                    continue;
                }
                Err(e) => {
                    warn!(blob = %path, error = %e, "Failed to read trigger blob");
                    self.blobs.notify(path.clone());
                    continue;
                }
            };

            let parent = self.causality.blob_writer(&path);
            for (function, bindings) in accepted {
                let mut metadata = bindings;
                metadata.insert("blob_path".to_string(), path.to_string());
                metadata.insert("discovered_via".to_string(), via.as_str().to_string());
                pending.push(PendingInvocation {
                    instance: Uuid::new_v4(),
                    function,
                    reason: TriggerReason::Blob {
                        path: path.clone(),
                        parent,
                    },
                    input: InvocationInput::Blob {
                        path: path.clone(),
                        content: content.clone(),
                    },
                    trigger_metadata: metadata,
                    queue: None,
                });
            }
        }
        pending
    }

    async fn queue_invocations(&mut self) -> Vec<PendingInvocation> {
        let cancel = self.context.shutdown_token();
        let mut pending = Vec::new();
        for (index, binding) in self.queues.iter_mut().enumerate() {
            let mut messages = Vec::new();
            binding
                .listener
                .poll(&cancel, |candidate| {
                    if let CandidateSource::Queue(message) = candidate.source {
                        messages.push(message);
                    }
                })
                .await;

            for message in messages {
                let parent = self.causality.message_writer(&message.id);
                let trigger_metadata = BTreeMap::from([
                    ("queue".to_string(), message.queue.clone()),
                    ("message_id".to_string(), message.id.clone()),
                    ("dequeue_count".to_string(), message.dequeue_count.to_string()),
                    ("inserted_at".to_string(), message.inserted_at.to_rfc3339()),
                ]);
                pending.push(PendingInvocation {
                    instance: Uuid::new_v4(),
                    function: binding.function.clone(),
                    reason: TriggerReason::Queue {
                        queue: message.queue.clone(),
                        message_id: message.id.clone(),
                        parent,
                    },
                    input: InvocationInput::Queue {
                        queue: message.queue.clone(),
                        message_id: message.id.clone(),
                        content: message.content.clone(),
                    },
                    trigger_metadata,
                    queue: Some((index, message)),
                });
            }
        }
        pending
    }

    fn timer_invocations(&mut self) -> Vec<PendingInvocation> {
        let now = Instant::now();
        let mut pending = Vec::new();
        for timer in &mut self.timers {
            if timer.next_due.is_some_and(|due| now < due) {
                continue;
            }
            timer.next_due = Some(now + timer.interval);
            pending.push(PendingInvocation {
                instance: Uuid::new_v4(),
                function: timer.function.clone(),
                reason: TriggerReason::Timer {
                    interval_secs: timer.interval.as_secs(),
                },
                input: InvocationInput::None,
                trigger_metadata: BTreeMap::new(),
                queue: None,
            });
        }
        pending
    }

    /// Mark `invocation` running and hand it to the invoker.
    fn start(&mut self, invocation: PendingInvocation) -> BoxFuture<'static, Finished> {
        self.causality.record(TriggerEvent {
            instance: invocation.instance,
            function: invocation.function.id().to_string(),
            reason: invocation.reason.clone(),
        });
        self.instances.update(
            FunctionInstanceLogEntry::queued(
                invocation.instance,
                invocation.function.id(),
                invocation.reason.clone(),
            )
            .running(Utc::now()),
        );
        info!(
            function = %invocation.function,
            instance = %invocation.instance,
            reason = %invocation.reason,
            "Executing function"
        );

        let invoker = self.invoker.clone();
        let request = invocation.request();
        Box::pin(async move {
            let started = Instant::now();
            let result = invoker.invoke(request).await;
            (invocation, started, result)
        })
    }

    async fn finish(
        &mut self,
        invocation: PendingInvocation,
        started: Instant,
        result: Result<InvocationResponse, InvocationError>,
    ) {
        let result = match result {
            Ok(response) => self.apply_outputs(&invocation, response).await,
            Err(e) => Err(e),
        };

        let entry = FunctionInstanceLogEntry::queued(
            invocation.instance,
            invocation.function.id(),
            invocation.reason.clone(),
        );
        let succeeded = result.is_ok();
        let status = match result {
            Ok(outputs) => {
                info!(function = %invocation.function, instance = %invocation.instance, "Function succeeded");
                if let Some(path) = invocation.trigger_blob() {
                    self.blob_attempts
                        .remove(&(invocation.function.clone(), path.clone()));
                }
                self.instances.update(entry.succeeded(Utc::now(), outputs));
                InvocationStatus::Succeeded
            }
            Err(e) => {
                error!(
                    function = %invocation.function,
                    instance = %invocation.instance,
                    error = %e,
                    "Function failed"
                );
                let timed_out =
                    matches!(&e, InvocationError::Rpc { source, .. } if source.is_timeout());
                if let Some(path) = invocation.trigger_blob() {
                    self.retry_blob(&invocation.function, path, e.is_retryable())
                        .await;
                }
                self.instances.update(entry.failed(Utc::now(), e.to_string()));
                if timed_out {
                    InvocationStatus::TimedOut
                } else {
                    InvocationStatus::Failed
                }
            }
        };
        emit!(InvocationCompleted {
            function: invocation.function.id().to_string(),
            status,
            duration: started.elapsed(),
        });

        if let Some((index, message)) = &invocation.queue {
            if let Some(binding) = self.queues.get(*index) {
                if let Err(e) = binding.listener.complete(message, succeeded).await {
                    warn!(queue = %binding.listener.queue(), message_id = %message.id, error = %e, "Failed to complete message");
                }
            }
        }
    }

    /// Schedule another run of a failed blob trigger, up to the attempt
    /// limit. Past the limit the trigger is parked on [`BLOB_POISON_QUEUE`].
    async fn retry_blob(&mut self, function: &FunctionKey, path: &BlobPath, retryable: bool) {
        let key = (function.clone(), path.clone());
        if !retryable {
            self.blob_attempts.remove(&key);
            return;
        }

        let attempts = self.blob_attempts.entry(key.clone()).or_insert(0);
        *attempts += 1;
        if *attempts < self.max_blob_attempts {
            debug!(function = %function, blob = %path, attempts = *attempts, "Retrying blob trigger");
            self.blobs.notify(path.clone());
            return;
        }

        self.blob_attempts.remove(&key);
        warn!(
            function = %function,
            blob = %path,
            max_attempts = self.max_blob_attempts,
            poison_queue = BLOB_POISON_QUEUE,
            "Blob trigger reached max attempts, moving to poison queue"
        );
        let message = serde_json::json!({
            "function": function.id(),
            "blob": path.to_string(),
        });
        if let Err(e) = self
            .queue_store
            .add_message(BLOB_POISON_QUEUE, message.to_string())
            .await
        {
            warn!(function = %function, blob = %path, error = %e, "Failed to write poison message");
        }
        emit!(PoisonMessageMoved {
            queue: BLOB_POISON_QUEUE.to_string(),
        });
    }

    /// Write the outputs the worker returned. Returns what was written.
    async fn apply_outputs(
        &mut self,
        invocation: &PendingInvocation,
        response: InvocationResponse,
    ) -> Result<Vec<String>, InvocationError> {
        let mut written = Vec::with_capacity(response.outputs.len());
        for output in response.outputs {
            match output {
                OutputBinding::Blob { path, content } => {
                    let declared = self
                        .registry
                        .get(&invocation.function)
                        .is_some_and(|function| function.declares_output(&path));
                    ensure!(
                        declared,
                        UndeclaredOutputSnafu {
                            function: invocation.function.id(),
                            path: path.to_string(),
                        }
                    );
                    self.store
                        .write_blob(&path, Bytes::from(content))
                        .await
                        .context(WriteOutputSnafu {
                            path: path.to_string(),
                        })?;
                    self.causality.record_blob_write(path.clone(), invocation.instance);
                    self.blobs.notify(path.clone());
                    written.push(path.to_string());
                }
                OutputBinding::Queue { queue, message } => {
                    let added = self
                        .queue_store
                        .add_message(&queue, message)
                        .await
                        .context(WriteOutputSnafu {
                            path: queue.clone(),
                        })?;
                    self.causality.record_message_write(added.id, invocation.instance);
                    written.push(format!("queue:{queue}"));
                }
            }
        }
        Ok(written)
    }
}

#[async_trait]
impl PollingProcessor for TriggerScheduler {
    type State = Vec<PendingInvocation>;
    type Error = HostError;

    async fn prepare(&mut self, _cold_start: bool) -> Result<Option<Self::State>, Self::Error> {
        let cancel = self.context.shutdown_token();
        let mut candidates = Vec::new();
        self.blobs
            .poll(&cancel, |candidate| candidates.push(candidate))
            .await;

        let mut pending = self.blob_invocations(candidates).await;
        pending.extend(self.queue_invocations().await);
        pending.extend(self.timer_invocations());

        if pending.is_empty() {
            return Ok(None);
        }
        for invocation in &pending {
            self.instances.update(FunctionInstanceLogEntry::queued(
                invocation.instance,
                invocation.function.id(),
                invocation.reason.clone(),
            ));
        }
        debug!(count = pending.len(), "Invocations queued");
        Ok(Some(pending))
    }

    async fn process(&mut self, state: Self::State) -> Result<IterationResult, Self::Error> {
        let mut queued = state.into_iter();
        let mut running: FuturesUnordered<BoxFuture<'static, Finished>> = FuturesUnordered::new();
        for invocation in queued.by_ref().take(self.max_concurrent) {
            running.push(self.start(invocation));
        }

        while let Some((invocation, started, result)) = running.next().await {
            self.finish(invocation, started, result).await;
            if let Some(next) = queued.next() {
                running.push(self.start(next));
            }
        }

        Ok(IterationResult::ProcessedItems)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::error::RpcError;
    use crate::host::instance::InstanceStatus;
    use crate::test_support::{FakeBlobStore, ts};
    use flurry_core::{StorageProvider, StoreQueue};
    use std::sync::Mutex;

    /// Records requests and answers them through a closure.
    struct ScriptedInvoker {
        requests: Mutex<Vec<InvocationRequest>>,
        respond: Box<dyn Fn(&InvocationRequest) -> Result<Vec<OutputBinding>, InvocationError> + Send + Sync>,
    }

    impl ScriptedInvoker {
        fn new(
            respond: impl Fn(&InvocationRequest) -> Result<Vec<OutputBinding>, InvocationError>
            + Send
            + Sync
            + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            })
        }

        fn functions(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.function_id.clone())
                .collect()
        }
    }

    #[async_trait]
    impl FunctionInvoker for ScriptedInvoker {
        async fn invoke(
            &self,
            request: InvocationRequest,
        ) -> Result<InvocationResponse, InvocationError> {
            self.requests.lock().unwrap().push(request.clone());
            let outputs = (self.respond)(&request)?;
            Ok(InvocationResponse {
                invocation_id: request.invocation_id,
                outputs,
                return_value: None,
            })
        }
    }

    const CONFIG: &str = r#"
worker: { command: node }
functions:
  convert:
    trigger: { type: blob, path: "input/{name}.csv" }
    outputs: ["output/{name}.json"]
  audit:
    trigger: { type: blob, path: "output/{name}.json" }
  orders:
    trigger: { type: queue, queue: orders }
  tick:
    trigger: { type: timer, interval_secs: 60 }
"#;

    struct Harness {
        scheduler: TriggerScheduler,
        store: Arc<FakeBlobStore>,
        queues: Arc<StoreQueue>,
        invoker: Arc<ScriptedInvoker>,
    }

    fn harness(invoker: Arc<ScriptedInvoker>) -> Harness {
        harness_with(CONFIG, invoker)
    }

    fn harness_with(config: &str, invoker: Arc<ScriptedInvoker>) -> Harness {
        let config = HostConfig::parse(config).unwrap();
        let registry = FunctionRegistry::from_config(&config).unwrap();
        let store = Arc::new(
            FakeBlobStore::new()
                .with_container("input")
                .with_container("output"),
        );
        let queues = Arc::new(StoreQueue::new(Arc::new(StorageProvider::in_memory())));
        let blobs = BlobListener::new(store.clone(), registry.containers());
        let options = SchedulerOptions {
            queue: QueueListenerOptions {
                batch_size: 1,
                min_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
                ..Default::default()
            },
            max_concurrent_invocations: 2,
        };
        let scheduler = TriggerScheduler::new(
            Arc::new(HostContext::new("test")),
            registry,
            blobs,
            store.clone(),
            queues.clone(),
            invoker.clone(),
            options,
        );
        Harness {
            scheduler,
            store,
            queues,
            invoker,
        }
    }

    async fn tick(scheduler: &mut TriggerScheduler) -> usize {
        match scheduler.prepare(false).await.unwrap() {
            Some(pending) => {
                let count = pending.len();
                scheduler.process(pending).await.unwrap();
                count
            }
            None => 0,
        }
    }

    /// Tick until the startup scans finished and a tick found nothing to do.
    async fn settle(scheduler: &mut TriggerScheduler) {
        for _ in 0..50 {
            let ran = tick(scheduler).await;
            if ran == 0 && !scheduler.blob_listener().is_scanning() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("scheduler did not settle");
    }

    fn count(invoker: &ScriptedInvoker, function: &str) -> usize {
        invoker.functions().iter().filter(|f| *f == function).count()
    }

    fn convert_outputs(request: &InvocationRequest) -> Result<Vec<OutputBinding>, InvocationError> {
        match request.function_id.as_str() {
            "convert" => {
                let name = &request.trigger_metadata["name"];
                Ok(vec![OutputBinding::Blob {
                    path: BlobPath::new("output", format!("{name}.json")),
                    content: "{}".to_string(),
                }])
            }
            _ => Ok(vec![]),
        }
    }

    #[tokio::test]
    async fn test_blob_chain_records_causality() {
        let mut h = harness(ScriptedInvoker::new(convert_outputs));
        h.store.put("input/a.csv", ts(10));

        // The scan delivers input/a.csv, convert writes output/a.json and the
        // notification for that write triggers audit.
        settle(&mut h.scheduler).await;
        assert!(h.store.content("output/a.json").is_some());
        assert_eq!(count(&h.invoker, "tick"), 1);
        assert_eq!(count(&h.invoker, "convert"), 1);
        assert!(count(&h.invoker, "audit") >= 1);

        let events = h.scheduler.causality().events();
        let convert = events.iter().find(|e| e.function == "convert").unwrap();
        let audit = events.iter().find(|e| e.function == "audit").unwrap();
        assert_eq!(h.scheduler.causality().parent(audit.instance), Some(convert.instance));
        assert_eq!(
            h.scheduler.instances().get(&convert.instance).unwrap().outputs,
            vec!["output/a.json".to_string()]
        );
    }

    #[tokio::test]
    async fn test_up_to_date_input_is_skipped() {
        let mut h = harness(ScriptedInvoker::new(convert_outputs));
        h.store.put("input/a.csv", ts(10));
        h.store.put("output/a.json", ts(20));

        settle(&mut h.scheduler).await;

        // audit has no outputs, so the scanned output blob always runs it.
        assert_eq!(count(&h.invoker, "convert"), 0);
        assert_eq!(count(&h.invoker, "audit"), 1);
    }

    #[tokio::test]
    async fn test_duplicate_deliveries_in_one_tick_run_once() {
        let mut h = harness(ScriptedInvoker::new(convert_outputs));
        settle(&mut h.scheduler).await;

        h.store.put("input/b.csv", ts(10));
        h.scheduler.blob_listener().notify(BlobPath::new("input", "b.csv"));
        h.scheduler.blob_listener().notify(BlobPath::new("input", "b.csv"));
        tick(&mut h.scheduler).await;

        assert_eq!(count(&h.invoker, "convert"), 1);
    }

    #[tokio::test]
    async fn test_queue_message_deleted_only_on_success() {
        let mut h = harness(ScriptedInvoker::new(|request| {
            if request.function_id == "orders" {
                Err(InvocationError::NotLoaded {
                    function: "orders".to_string(),
                })
            } else {
                Ok(vec![])
            }
        }));
        h.queues.add_message("orders", "first".to_string()).await.unwrap();

        tick(&mut h.scheduler).await;
        let entry = h
            .scheduler
            .instances()
            .iter()
            .find(|e| e.function == "orders")
            .unwrap();
        assert_eq!(entry.status, InstanceStatus::Failed);

        // Still in the queue, hidden until the visibility timeout lapses.
        let again = h
            .queues
            .get_message("orders", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_queue_output_links_parent() {
        let mut h = harness(ScriptedInvoker::new(|request| match request.function_id.as_str() {
            "tick" => Ok(vec![OutputBinding::Queue {
                queue: "orders".to_string(),
                message: "from timer".to_string(),
            }]),
            _ => Ok(vec![]),
        }));

        tick(&mut h.scheduler).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        tick(&mut h.scheduler).await;
        assert_eq!(h.invoker.functions(), vec!["tick", "orders"]);

        let events = h.scheduler.causality().events();
        let timer = events.iter().find(|e| e.function == "tick").unwrap();
        let order = events.iter().find(|e| e.function == "orders").unwrap();
        assert_eq!(order.reason.parent(), Some(timer.instance));
    }

    #[tokio::test]
    async fn test_undeclared_output_fails_invocation() {
        let mut h = harness(ScriptedInvoker::new(|request| match request.function_id.as_str() {
            "tick" => Ok(vec![OutputBinding::Blob {
                path: BlobPath::new("input", "sneaky.csv"),
                content: String::new(),
            }]),
            _ => Ok(vec![]),
        }));

        tick(&mut h.scheduler).await;
        assert!(h.store.content("input/sneaky.csv").is_none());
        let entry = h
            .scheduler
            .instances()
            .iter()
            .find(|e| e.function == "tick")
            .unwrap();
        assert_eq!(entry.status, InstanceStatus::Failed);
        assert!(entry.error.as_deref().unwrap().contains("does not declare"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once_per_interval() {
        let mut h = harness(ScriptedInvoker::new(|_| Ok(vec![])));
        tick(&mut h.scheduler).await;
        tick(&mut h.scheduler).await;
        assert_eq!(h.invoker.functions(), vec!["tick"]);

        tokio::time::advance(Duration::from_secs(60)).await;
        tick(&mut h.scheduler).await;
        assert_eq!(h.invoker.functions(), vec!["tick", "tick"]);
    }

    #[tokio::test]
    async fn test_own_output_in_input_container_does_not_retrigger() {
        let config = r#"
worker: { command: node }
functions:
  convert:
    trigger: { type: blob, path: "data/{name}.csv" }
    outputs: ["data/{name}.output.csv"]
"#;
        let mut h = harness_with(
            config,
            ScriptedInvoker::new(|request| {
                let name = &request.trigger_metadata["name"];
                Ok(vec![OutputBinding::Blob {
                    path: BlobPath::new("data", format!("{name}.output.csv")),
                    content: String::new(),
                }])
            }),
        );
        h.store.put("data/a.csv", ts(10));

        settle(&mut h.scheduler).await;
        for _ in 0..5 {
            tick(&mut h.scheduler).await;
        }

        assert!(h.store.content("data/a.output.csv").is_some());
        assert!(h.store.content("data/a.output.output.csv").is_none());
        assert_eq!(count(&h.invoker, "convert"), 1);
    }

    #[tokio::test]
    async fn test_blob_retries_stop_at_max_attempts() {
        let mut h = harness(ScriptedInvoker::new(|request| match request.function_id.as_str() {
            "audit" => Err(InvocationError::Rpc {
                function: "audit".to_string(),
                source: RpcError::ChannelClosed {
                    worker: "gone".to_string(),
                },
            }),
            _ => Ok(vec![]),
        }));
        h.store.put("output/a.json", ts(10));

        settle(&mut h.scheduler).await;
        for _ in 0..5 {
            tick(&mut h.scheduler).await;
        }
        assert_eq!(count(&h.invoker, "audit"), 5);

        let poison = h
            .queues
            .get_message(BLOB_POISON_QUEUE, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        let parked: serde_json::Value = serde_json::from_str(&poison.content).unwrap();
        assert_eq!(parked["function"], "audit");
        assert_eq!(parked["blob"], "output/a.json");
    }

    #[tokio::test]
    async fn test_non_retryable_blob_failure_is_not_retried() {
        let mut h = harness(ScriptedInvoker::new(|request| match request.function_id.as_str() {
            "audit" => Err(InvocationError::NotLoaded {
                function: "audit".to_string(),
            }),
            _ => Ok(vec![]),
        }));
        h.store.put("output/a.json", ts(10));

        settle(&mut h.scheduler).await;
        assert_eq!(count(&h.invoker, "audit"), 1);
        let poison = h
            .queues
            .get_message(BLOB_POISON_QUEUE, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(poison.is_none());
    }
}
