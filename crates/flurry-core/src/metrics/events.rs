//! Internal events for flurry metrics emission.
//!
//! Each event struct represents a measurable occurrence in the host. Events
//! implement the `InternalEvent` trait which emits the corresponding
//! Prometheus metric.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

// ============ Storage ============

/// Storage operation type.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    List,
    Head,
    Get,
    Put,
    Delete,
    CreateContainer,
}

impl StorageOperation {
    fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::List => "list",
            StorageOperation::Head => "head",
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
            StorageOperation::Delete => "delete",
            StorageOperation::CreateContainer => "create_container",
        }
    }
}

/// Outcome of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    NotFound,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::NotFound => "not_found",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted for every storage request.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "flurry_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted with the latency of a storage request.
pub struct StorageRequestDuration {
    pub operation: StorageOperation,
    pub duration: Duration,
}

impl InternalEvent for StorageRequestDuration {
    fn emit(self) {
        histogram!(
            "flurry_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}

// ============ Discovery ============

/// How a trigger candidate was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverySource {
    Scan,
    Log,
    Queue,
    Notification,
}

impl DiscoverySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoverySource::Scan => "scan",
            DiscoverySource::Log => "log",
            DiscoverySource::Queue => "queue",
            DiscoverySource::Notification => "notification",
        }
    }
}

/// Event emitted when blobs are surfaced by a listener.
pub struct BlobsDiscovered {
    pub count: u64,
    pub source: DiscoverySource,
}

impl InternalEvent for BlobsDiscovered {
    fn emit(self) {
        trace!(count = self.count, source = self.source.as_str(), "Blobs discovered");
        counter!("flurry_blobs_discovered_total", "source" => self.source.as_str())
            .increment(self.count);
    }
}

/// Event emitted when a full container scan finishes.
pub struct ContainerScanCompleted {
    pub container: String,
    pub entries: u64,
    pub duration: Duration,
}

impl InternalEvent for ContainerScanCompleted {
    fn emit(self) {
        trace!(container = %self.container, entries = self.entries, "Container scan completed");
        counter!("flurry_container_scans_total", "container" => self.container.clone())
            .increment(1);
        histogram!("flurry_container_scan_duration_seconds", "container" => self.container)
            .record(self.duration.as_secs_f64());
    }
}

/// Event emitted when activity log lines are ignored.
pub struct LogLinesSkipped {
    pub count: u64,
}

impl InternalEvent for LogLinesSkipped {
    fn emit(self) {
        trace!(count = self.count, "Log lines skipped");
        counter!("flurry_log_lines_skipped_total").increment(self.count);
    }
}

// ============ Triggers ============

/// Result of evaluating a trigger candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionKind {
    Execute,
    NoMatch,
    InputMissing,
    UpToDate,
}

impl DecisionKind {
    fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Execute => "execute",
            DecisionKind::NoMatch => "no_match",
            DecisionKind::InputMissing => "input_missing",
            DecisionKind::UpToDate => "up_to_date",
        }
    }
}

/// Event emitted for every trigger decision.
pub struct TriggerDecisionMade {
    pub function: String,
    pub decision: DecisionKind,
}

impl InternalEvent for TriggerDecisionMade {
    fn emit(self) {
        trace!(function = %self.function, decision = self.decision.as_str(), "Trigger decision");
        counter!(
            "flurry_trigger_decisions_total",
            "function" => self.function,
            "decision" => self.decision.as_str()
        )
        .increment(1);
    }
}

/// Event emitted when messages are claimed from a queue.
pub struct QueueMessagesClaimed {
    pub queue: String,
    pub count: u64,
}

impl InternalEvent for QueueMessagesClaimed {
    fn emit(self) {
        trace!(queue = %self.queue, count = self.count, "Queue messages claimed");
        counter!("flurry_queue_messages_claimed_total", "queue" => self.queue)
            .increment(self.count);
    }
}

/// Event emitted when a message exceeds its dequeue budget.
pub struct PoisonMessageMoved {
    pub queue: String,
}

impl InternalEvent for PoisonMessageMoved {
    fn emit(self) {
        trace!(queue = %self.queue, "Poison message moved");
        counter!("flurry_poison_messages_total", "queue" => self.queue).increment(1);
    }
}

// ============ Worker RPC ============

/// Terminal state of a worker RPC call.
#[derive(Debug, Clone, Copy)]
pub enum RpcOutcome {
    Success,
    Failure,
    Timeout,
    Closed,
    Cancelled,
}

impl RpcOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            RpcOutcome::Success => "success",
            RpcOutcome::Failure => "failure",
            RpcOutcome::Timeout => "timeout",
            RpcOutcome::Closed => "closed",
            RpcOutcome::Cancelled => "cancelled",
        }
    }
}

/// Event emitted when an RPC call reaches a terminal state.
pub struct RpcCallCompleted {
    pub message_type: &'static str,
    pub outcome: RpcOutcome,
}

impl InternalEvent for RpcCallCompleted {
    fn emit(self) {
        trace!(
            message_type = self.message_type,
            outcome = self.outcome.as_str(),
            "RPC call completed"
        );
        counter!(
            "flurry_rpc_calls_total",
            "message_type" => self.message_type,
            "outcome" => self.outcome.as_str()
        )
        .increment(1);
    }
}

/// Event emitted with the round-trip time of a successful RPC call.
pub struct RpcCallDuration {
    pub message_type: &'static str,
    pub duration: Duration,
}

impl InternalEvent for RpcCallDuration {
    fn emit(self) {
        histogram!("flurry_rpc_call_duration_seconds", "message_type" => self.message_type)
            .record(self.duration.as_secs_f64());
    }
}

/// Event emitted to track calls waiting for a worker response.
pub struct PendingRpcCalls {
    pub count: usize,
    pub worker: String,
}

impl InternalEvent for PendingRpcCalls {
    fn emit(self) {
        gauge!("flurry_rpc_pending_calls", "worker" => self.worker).set(self.count as f64);
    }
}

// ============ Invocations ============

/// Final status of a function invocation.
#[derive(Debug, Clone, Copy)]
pub enum InvocationStatus {
    Succeeded,
    Failed,
    TimedOut,
}

impl InvocationStatus {
    fn as_str(&self) -> &'static str {
        match self {
            InvocationStatus::Succeeded => "succeeded",
            InvocationStatus::Failed => "failed",
            InvocationStatus::TimedOut => "timed_out",
        }
    }
}

/// Event emitted when a function invocation finishes.
pub struct InvocationCompleted {
    pub function: String,
    pub status: InvocationStatus,
    pub duration: Duration,
}

impl InternalEvent for InvocationCompleted {
    fn emit(self) {
        trace!(function = %self.function, status = self.status.as_str(), "Invocation completed");
        counter!(
            "flurry_invocations_total",
            "function" => self.function.clone(),
            "status" => self.status.as_str()
        )
        .increment(1);
        histogram!("flurry_invocation_duration_seconds", "function" => self.function)
            .record(self.duration.as_secs_f64());
    }
}

// ============ Polling ============

/// Result type for iteration metrics.
#[derive(Debug, Clone, Copy)]
pub enum IterationResultType {
    Processed,
    NoItems,
}

impl IterationResultType {
    fn as_str(&self) -> &'static str {
        match self {
            IterationResultType::Processed => "processed",
            IterationResultType::NoItems => "no_items",
        }
    }
}

/// Event emitted when a polling iteration completes.
pub struct IterationCompleted {
    pub result: IterationResultType,
    pub target: String,
}

impl InternalEvent for IterationCompleted {
    fn emit(self) {
        trace!(result = self.result.as_str(), target = %self.target, "Iteration completed");
        counter!(
            "flurry_iterations_total",
            "result" => self.result.as_str(),
            "target" => self.target
        )
        .increment(1);
    }
}

/// Event emitted with the duration of a polling iteration.
pub struct IterationDuration {
    pub duration: Duration,
    pub target: String,
}

impl InternalEvent for IterationDuration {
    fn emit(self) {
        histogram!("flurry_iteration_duration_seconds", "target" => self.target)
            .record(self.duration.as_secs_f64());
    }
}
