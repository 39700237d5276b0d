//! Serving the worker side of the protocol in-process.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::message::{
    Envelope, FunctionLoadRequest, FunctionLoadResponse, InvocationRequest, InvocationResponse,
    MessageType, WorkerInitRequest, WorkerInitResponse, WorkerStatusResponse,
};
use super::transport::WorkerEndpoint;

/// Function code running inside the host process.
#[async_trait]
pub trait FunctionWorker: Send + Sync + 'static {
    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    /// Accept or refuse a function. Refused functions are disabled by the host.
    async fn load(&self, _request: &FunctionLoadRequest) -> Result<(), String> {
        Ok(())
    }

    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationResponse, String>;
}

/// Answer requests arriving on `endpoint` with `worker` until the host goes away.
///
/// Invocations run concurrently.
pub fn serve<W: FunctionWorker>(mut endpoint: WorkerEndpoint, worker: Arc<W>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let endpoint_tx = endpoint.sender();
        while let Some(envelope) = endpoint.recv().await {
            let worker = worker.clone();
            let tx = endpoint_tx.clone();
            tokio::spawn(async move {
                if let Some(reply) = handle(worker.as_ref(), envelope).await {
                    let _ = tx.send(reply);
                }
            });
        }
        debug!("In-process worker stopped");
    })
}

async fn handle<W: FunctionWorker>(worker: &W, envelope: Envelope) -> Option<Envelope> {
    let id = envelope.request_id.clone();
    let result = match envelope.message_type {
        MessageType::WorkerInitRequest => match envelope.decode::<WorkerInitRequest>() {
            Ok(_) => Envelope::new(
                id.clone(),
                &WorkerInitResponse {
                    worker_version: worker.version(),
                    capabilities: Default::default(),
                },
            )
            .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        },
        MessageType::FunctionLoadRequest => match envelope.decode::<FunctionLoadRequest>() {
            Ok(request) => match worker.load(&request).await {
                Ok(()) => Envelope::new(
                    id.clone(),
                    &FunctionLoadResponse {
                        function_id: request.function_id,
                    },
                )
                .map_err(|e| e.to_string()),
                Err(message) => Err(message),
            },
            Err(e) => Err(e.to_string()),
        },
        MessageType::InvocationRequest => match envelope.decode::<InvocationRequest>() {
            Ok(request) => match worker.invoke(request).await {
                Ok(response) => Envelope::new(id.clone(), &response).map_err(|e| e.to_string()),
                Err(message) => Err(message),
            },
            Err(e) => Err(e.to_string()),
        },
        MessageType::WorkerStatusRequest => {
            Envelope::new(id.clone(), &WorkerStatusResponse::default()).map_err(|e| e.to_string())
        }
        _ => return None,
    };

    Some(match result {
        Ok(reply) => reply,
        Err(message) => Envelope::new(
            id.clone(),
            &super::message::Failure {
                message,
                stack_trace: None,
            },
        )
        .ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::message::{InvocationInput, OutputBinding};
    use crate::rpc::transport::memory_pair;
    use crate::rpc::WorkerChannel;
    use std::time::Duration;

    struct Upper;

    #[async_trait]
    impl FunctionWorker for Upper {
        async fn load(&self, request: &FunctionLoadRequest) -> Result<(), String> {
            if request.name == "missing" {
                return Err("no such function".to_string());
            }
            Ok(())
        }

        async fn invoke(&self, request: InvocationRequest) -> Result<InvocationResponse, String> {
            let InvocationInput::Queue { content, .. } = request.input else {
                return Err("expected a queue message".to_string());
            };
            Ok(InvocationResponse {
                invocation_id: request.invocation_id,
                outputs: vec![OutputBinding::Queue {
                    queue: "done".to_string(),
                    message: content.to_uppercase(),
                }],
                return_value: None,
            })
        }
    }

    #[tokio::test]
    async fn test_serve_answers_protocol() {
        let (context, endpoint) = memory_pair("in-process");
        let _server = serve(endpoint, Arc::new(Upper));
        let channel = WorkerChannel::new(context);
        let timeout = Duration::from_secs(5);

        let init = channel
            .send(
                &WorkerInitRequest {
                    host_version: "1".to_string(),
                },
                timeout,
            )
            .await
            .unwrap();
        assert_eq!(init.worker_version, env!("CARGO_PKG_VERSION"));

        let refused = channel
            .send(
                &FunctionLoadRequest {
                    function_id: "f1".to_string(),
                    name: "missing".to_string(),
                    trigger: serde_json::Value::Null,
                },
                timeout,
            )
            .await;
        assert!(matches!(refused, Err(crate::error::RpcError::Worker { .. })));

        let invocation_id = uuid::Uuid::new_v4();
        let response = channel
            .send(
                &InvocationRequest {
                    invocation_id,
                    function_id: "f1".to_string(),
                    trigger_metadata: Default::default(),
                    input: InvocationInput::Queue {
                        queue: "orders".to_string(),
                        message_id: "m1".to_string(),
                        content: "hello".to_string(),
                    },
                },
                timeout,
            )
            .await
            .unwrap();
        assert_eq!(response.invocation_id, invocation_id);
        assert_eq!(
            response.outputs,
            vec![OutputBinding::Queue {
                queue: "done".to_string(),
                message: "HELLO".to_string(),
            }]
        );
    }
}
