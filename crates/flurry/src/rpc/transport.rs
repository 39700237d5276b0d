//! Ways to connect a [`ChannelContext`] to a worker.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use super::channel::ChannelContext;
use super::message::{Envelope, Failure, RequestId, RpcMessage};
use crate::error::RpcError;

/// Longest accepted line, in bytes.
pub const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Speak newline-delimited JSON envelopes over a byte stream pair.
///
/// Malformed lines are skipped. The inbound side ends at EOF or on a read
/// error, which closes the channel.
pub fn framed<R, W>(worker_id: impl Into<String>, reader: R, writer: W) -> ChannelContext
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let worker_id = worker_id.into();
    let (inbound_tx, inbound) = mpsc::unbounded_channel();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Envelope>();

    let reader_id = worker_id.clone();
    tokio::spawn(async move {
        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(worker = %reader_id, "Skipping oversized message from worker");
                    continue;
                }
                Err(e) => {
                    warn!(worker = %reader_id, error = %e, "Failed to read from worker");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Envelope>(&line) {
                Ok(envelope) => {
                    if inbound_tx.send(envelope).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(worker = %reader_id, error = %e, "Skipping malformed message from worker"),
            }
        }
        debug!(worker = %reader_id, "Worker reader finished");
    });

    let writer_id = worker_id.clone();
    tokio::spawn(async move {
        let mut sink = FramedWrite::new(writer, LinesCodec::new());
        while let Some(envelope) = outbound_rx.recv().await {
            let line = match serde_json::to_string(&envelope) {
                Ok(line) => line,
                Err(e) => {
                    warn!(worker = %writer_id, error = %e, "Failed to encode message for worker");
                    continue;
                }
            };
            if let Err(e) = sink.send(line).await {
                warn!(worker = %writer_id, error = %e, "Failed to write to worker");
                break;
            }
        }
        debug!(worker = %writer_id, "Worker writer finished");
    });

    ChannelContext {
        worker_id,
        inbound,
        outbound,
    }
}

/// The worker's half of an in-process connection.
#[derive(Debug)]
pub struct WorkerEndpoint {
    inbound: mpsc::UnboundedReceiver<Envelope>,
    outbound: mpsc::UnboundedSender<Envelope>,
}

impl WorkerEndpoint {
    /// Next message sent by the host, or `None` once the host side is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.inbound.recv().await
    }

    /// A sender for replies from other tasks.
    pub fn sender(&self) -> mpsc::UnboundedSender<Envelope> {
        self.outbound.clone()
    }

    /// Send `message` tagged with `request_id`.
    pub fn reply<M: RpcMessage>(&self, request_id: &RequestId, message: &M) -> Result<(), RpcError> {
        let envelope = Envelope::new(request_id.clone(), message)?;
        self.outbound
            .send(envelope)
            .map_err(|_| RpcError::ChannelClosed {
                worker: "host".to_string(),
            })
    }

    /// Answer `request_id` with a failure.
    pub fn fail(&self, request_id: &RequestId, message: impl Into<String>) -> Result<(), RpcError> {
        self.reply(
            request_id,
            &Failure {
                message: message.into(),
                stack_trace: None,
            },
        )
    }
}

/// Connect a channel to an in-process worker.
pub fn memory_pair(worker_id: impl Into<String>) -> (ChannelContext, WorkerEndpoint) {
    let (to_worker, worker_inbound) = mpsc::unbounded_channel();
    let (to_host, host_inbound) = mpsc::unbounded_channel();
    (
        ChannelContext {
            worker_id: worker_id.into(),
            inbound: host_inbound,
            outbound: to_worker,
        },
        WorkerEndpoint {
            inbound: worker_inbound,
            outbound: to_host,
        },
    )
}
