//! Request/response multiplexing over one worker stream.
//!
//! Each call registers a oneshot sender under its request id. The
//! dispatcher task completes calls as matching envelopes arrive, a call's
//! own deadline expires it, and [`WorkerChannel::cancel`] fails it from
//! outside. All three remove the entry under the same lock, so a call
//! reaches exactly one terminal state.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::IntoFuture;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, error, info, trace, warn};

use flurry_core::emit;
use flurry_core::metrics::events::{PendingRpcCalls, RpcCallCompleted, RpcCallDuration, RpcOutcome};

use super::message::{
    Envelope, Failure, LogLevel, MessageType, RequestId, RpcLog, RpcMessage, RpcRequest,
};
use crate::error::RpcError;

/// The two directions of a connected worker.
#[derive(Debug)]
pub struct ChannelContext {
    pub worker_id: String,
    pub inbound: mpsc::UnboundedReceiver<Envelope>,
    pub outbound: mpsc::UnboundedSender<Envelope>,
}

type CallResult = Result<Envelope, RpcError>;

struct PendingCall {
    expected: MessageType,
    tx: oneshot::Sender<CallResult>,
}

#[derive(Default)]
struct CallTable {
    calls: HashMap<RequestId, PendingCall>,
    closed: bool,
}

struct Shared {
    worker_id: String,
    table: Mutex<CallTable>,
    outbound: mpsc::UnboundedSender<Envelope>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CallTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn closed_error(&self) -> RpcError {
        RpcError::ChannelClosed {
            worker: self.worker_id.clone(),
        }
    }

    fn report_pending(&self, count: usize) {
        emit!(PendingRpcCalls {
            count,
            worker: self.worker_id.clone(),
        });
    }

    fn register(&self, id: RequestId, call: PendingCall) -> Result<(), RpcError> {
        let count = {
            let mut table = self.lock();
            if table.closed {
                return Err(self.closed_error());
            }
            table.calls.insert(id, call);
            table.calls.len()
        };
        self.report_pending(count);
        Ok(())
    }

    /// Remove a pending call. Returns `None` if it already reached a terminal state.
    fn take(&self, id: &RequestId) -> Option<PendingCall> {
        let (call, count) = {
            let mut table = self.lock();
            let call = table.calls.remove(id);
            (call, table.calls.len())
        };
        if call.is_some() {
            self.report_pending(count);
        }
        call
    }

    fn complete(&self, envelope: Envelope) {
        let Some(call) = self.take(&envelope.request_id) else {
            debug!(
                worker = %self.worker_id,
                request_id = %envelope.request_id,
                message_type = %envelope.message_type,
                "Ignoring message with no pending call"
            );
            return;
        };

        let result = if envelope.message_type == MessageType::Failure {
            match envelope.decode::<Failure>() {
                Ok(failure) => Err(RpcError::Worker {
                    message: failure.message,
                    stack_trace: failure.stack_trace,
                }),
                Err(e) => Err(e),
            }
        } else if envelope.message_type == call.expected {
            Ok(envelope)
        } else {
            Err(RpcError::UnexpectedMessage {
                expected: call.expected.as_str(),
                actual: envelope.message_type.as_str().to_string(),
            })
        };
        let _ = call.tx.send(result);
    }

    /// Fail every pending call and refuse new ones.
    fn close(&self) {
        let drained: Vec<PendingCall> = {
            let mut table = self.lock();
            table.closed = true;
            table.calls.drain().map(|(_, call)| call).collect()
        };
        if !drained.is_empty() {
            warn!(worker = %self.worker_id, pending = drained.len(), "Failing calls pending on closed channel");
        }
        for call in drained {
            let _ = call.tx.send(Err(self.closed_error()));
        }
        self.report_pending(0);
    }
}

fn forward_log(worker: &str, envelope: &Envelope) {
    let log = match envelope.decode::<RpcLog>() {
        Ok(log) => log,
        Err(e) => {
            debug!(worker, error = %e, "Dropping malformed worker log");
            return;
        }
    };
    let invocation_id = log.invocation_id.map(|id| id.to_string()).unwrap_or_default();
    let category = log.category.as_deref().unwrap_or_default();
    match log.level {
        LogLevel::Trace => trace!(worker, invocation_id = %invocation_id, category, "{}", log.message),
        LogLevel::Debug => debug!(worker, invocation_id = %invocation_id, category, "{}", log.message),
        LogLevel::Information => info!(worker, invocation_id = %invocation_id, category, "{}", log.message),
        LogLevel::Warning => warn!(worker, invocation_id = %invocation_id, category, "{}", log.message),
        LogLevel::Error => error!(worker, invocation_id = %invocation_id, category, "{}", log.message),
    }
}

async fn dispatch(shared: Arc<Shared>, mut inbound: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = inbound.recv().await {
        if envelope.message_type == MessageType::RpcLog {
            forward_log(&shared.worker_id, &envelope);
        } else {
            shared.complete(envelope);
        }
    }
    info!(worker = %shared.worker_id, "Worker stream closed");
    shared.close();
}

/// Multiplexes concurrent calls to one worker.
pub struct WorkerChannel {
    shared: Arc<Shared>,
    dispatcher: AbortOnDropHandle<()>,
}

impl std::fmt::Debug for WorkerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerChannel")
            .field("worker_id", &self.shared.worker_id)
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl WorkerChannel {
    /// Start dispatching inbound messages from `context`.
    pub fn new(context: ChannelContext) -> Self {
        let shared = Arc::new(Shared {
            worker_id: context.worker_id,
            table: Mutex::new(CallTable::default()),
            outbound: context.outbound,
        });
        let dispatcher = AbortOnDropHandle::new(tokio::spawn(dispatch(
            shared.clone(),
            context.inbound,
        )));
        Self { shared, dispatcher }
    }

    pub fn worker_id(&self) -> &str {
        &self.shared.worker_id
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn pending_count(&self) -> usize {
        self.shared.lock().calls.len()
    }

    /// Send `request` and return a handle for its response.
    ///
    /// The deadline is `timeout` from now.
    pub fn start<R: RpcRequest>(
        &self,
        request: &R,
        timeout: Duration,
    ) -> Result<PendingResponse<R::Response>, RpcError> {
        let id = RequestId::new();
        let envelope = Envelope::new(id.clone(), request)?;
        let (tx, rx) = oneshot::channel();
        self.shared.register(
            id.clone(),
            PendingCall {
                expected: <R::Response as RpcMessage>::MESSAGE_TYPE,
                tx,
            },
        )?;

        let started = Instant::now();
        if self.shared.outbound.send(envelope).is_err() {
            self.shared.take(&id);
            return Err(self.shared.closed_error());
        }
        trace!(worker = %self.shared.worker_id, request_id = %id, message_type = %R::MESSAGE_TYPE, "Sent request");

        Ok(PendingResponse {
            id,
            message_type: R::MESSAGE_TYPE,
            timeout,
            started,
            deadline: started + timeout,
            rx,
            shared: self.shared.clone(),
            _response: PhantomData,
        })
    }

    /// Send `request` and wait for its response.
    pub async fn send<R: RpcRequest>(
        &self,
        request: &R,
        timeout: Duration,
    ) -> Result<R::Response, RpcError> {
        self.start(request, timeout)?.wait().await
    }

    /// Send a message that is never answered.
    pub fn post<M: RpcMessage>(&self, message: &M) -> Result<(), RpcError> {
        if self.is_closed() {
            return Err(self.shared.closed_error());
        }
        let envelope = Envelope::new(RequestId::new(), message)?;
        self.shared
            .outbound
            .send(envelope)
            .map_err(|_| self.shared.closed_error())
    }

    /// Fail the pending call `id` with [`RpcError::Cancelled`].
    ///
    /// Returns false if the call already completed.
    pub fn cancel(&self, id: &RequestId) -> bool {
        match self.shared.take(id) {
            Some(call) => {
                let _ = call.tx.send(Err(RpcError::Cancelled {
                    request_id: id.to_string(),
                }));
                true
            }
            None => false,
        }
    }

    /// Stop dispatching and fail everything still pending.
    pub fn close(&self) {
        self.dispatcher.abort();
        self.shared.close();
    }
}

impl Drop for WorkerChannel {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Handle to one in-flight call.
///
/// Dropping it before completion removes the pending entry.
pub struct PendingResponse<T> {
    id: RequestId,
    message_type: MessageType,
    timeout: Duration,
    started: Instant,
    deadline: Instant,
    rx: oneshot::Receiver<CallResult>,
    shared: Arc<Shared>,
    _response: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for PendingResponse<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse")
            .field("id", &self.id)
            .field("message_type", &self.message_type)
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl<T: RpcMessage> PendingResponse<T> {
    pub fn request_id(&self) -> &RequestId {
        &self.id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the response, the deadline, or the call being failed.
    pub async fn wait(mut self) -> Result<T, RpcError> {
        let received = match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(received) => Some(received.ok()),
            Err(_) if self.shared.take(&self.id).is_some() => None,
            // Removed by the dispatcher or `cancel` first, which already sent its result.
            Err(_) => Some(self.rx.try_recv().ok()),
        };
        let result = match received {
            None => Err(RpcError::Timeout {
                request_id: self.id.to_string(),
                message_type: self.message_type.as_str(),
                timeout: self.timeout,
            }),
            Some(None) => Err(self.shared.closed_error()),
            Some(Some(Ok(envelope))) => envelope.decode::<T>(),
            Some(Some(Err(e))) => Err(e),
        };

        let outcome = match &result {
            Ok(_) => RpcOutcome::Success,
            Err(RpcError::Timeout { .. }) => RpcOutcome::Timeout,
            Err(RpcError::ChannelClosed { .. }) => RpcOutcome::Closed,
            Err(RpcError::Cancelled { .. }) => RpcOutcome::Cancelled,
            Err(_) => RpcOutcome::Failure,
        };
        emit!(RpcCallCompleted {
            message_type: self.message_type.as_str(),
            outcome,
        });
        if result.is_ok() {
            emit!(RpcCallDuration {
                message_type: self.message_type.as_str(),
                duration: self.started.elapsed(),
            });
        }
        result
    }
}

impl<T: RpcMessage> IntoFuture for PendingResponse<T> {
    type Output = Result<T, RpcError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl<T> Drop for PendingResponse<T> {
    fn drop(&mut self) {
        self.shared.take(&self.id);
    }
}
