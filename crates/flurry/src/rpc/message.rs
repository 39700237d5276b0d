//! Worker protocol messages.
//!
//! Every message travels in an [`Envelope`] carrying the request id used for
//! correlation and a [`MessageType`] tag naming the payload.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use flurry_core::BlobPath;

use crate::error::{DecodeSnafu, EncodeSnafu, RpcError};

/// Payload discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    WorkerInitRequest,
    WorkerInitResponse,
    FunctionLoadRequest,
    FunctionLoadResponse,
    InvocationRequest,
    InvocationResponse,
    WorkerStatusRequest,
    WorkerStatusResponse,
    InvocationCancel,
    RpcLog,
    Failure,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::WorkerInitRequest => "worker_init_request",
            MessageType::WorkerInitResponse => "worker_init_response",
            MessageType::FunctionLoadRequest => "function_load_request",
            MessageType::FunctionLoadResponse => "function_load_response",
            MessageType::InvocationRequest => "invocation_request",
            MessageType::InvocationResponse => "invocation_response",
            MessageType::WorkerStatusRequest => "worker_status_request",
            MessageType::WorkerStatusResponse => "worker_status_response",
            MessageType::InvocationCancel => "invocation_cancel",
            MessageType::RpcLog => "rpc_log",
            MessageType::Failure => "failure",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Correlation token, unique for the lifetime of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A typed payload with its wire tag.
pub trait RpcMessage: Serialize + DeserializeOwned + Send + 'static {
    const MESSAGE_TYPE: MessageType;
}

/// A message that expects a response.
pub trait RpcRequest: RpcMessage {
    type Response: RpcMessage;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub request_id: RequestId,
    pub message_type: MessageType,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new<M: RpcMessage>(request_id: RequestId, message: &M) -> Result<Self, RpcError> {
        let payload = serde_json::to_value(message).context(EncodeSnafu {
            message_type: M::MESSAGE_TYPE.as_str(),
        })?;
        Ok(Self {
            request_id,
            message_type: M::MESSAGE_TYPE,
            payload,
        })
    }

    pub fn decode<M: RpcMessage>(&self) -> Result<M, RpcError> {
        serde_json::from_value(self.payload.clone()).context(DecodeSnafu {
            message_type: M::MESSAGE_TYPE.as_str(),
        })
    }
}

macro_rules! rpc_message {
    ($ty:ty => $tag:ident) => {
        impl RpcMessage for $ty {
            const MESSAGE_TYPE: MessageType = MessageType::$tag;
        }
    };
    ($ty:ty => $tag:ident, response $resp:ty) => {
        rpc_message!($ty => $tag);

        impl RpcRequest for $ty {
            type Response = $resp;
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInitRequest {
    pub host_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInitResponse {
    pub worker_version: String,
    #[serde(default)]
    pub capabilities: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionLoadRequest {
    pub function_id: String,
    pub name: String,
    /// The function's trigger configuration as written by the user.
    pub trigger: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionLoadResponse {
    pub function_id: String,
}

/// Content handed to the function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvocationInput {
    /// Blob content, decoded as UTF-8 with invalid sequences replaced.
    Blob { path: BlobPath, content: String },
    Queue { queue: String, message_id: String, content: String },
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub invocation_id: Uuid,
    pub function_id: String,
    #[serde(default)]
    pub trigger_metadata: BTreeMap<String, String>,
    pub input: InvocationInput,
}

/// Something the function asked the host to write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputBinding {
    Blob { path: BlobPath, content: String },
    Queue { queue: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub invocation_id: Uuid,
    #[serde(default)]
    pub outputs: Vec<OutputBinding>,
    #[serde(default)]
    pub return_value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatusRequest {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatusResponse {
    #[serde(default)]
    pub active_invocations: u32,
}

/// Asks the worker to abandon an invocation. Not answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationCancel {
    pub invocation_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Information,
    Warning,
    Error,
}

/// Unsolicited log output from the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcLog {
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub invocation_id: Option<Uuid>,
    #[serde(default)]
    pub category: Option<String>,
}

/// Explicit failure answer to any request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub message: String,
    #[serde(default)]
    pub stack_trace: Option<String>,
}

rpc_message!(WorkerInitRequest => WorkerInitRequest, response WorkerInitResponse);
rpc_message!(WorkerInitResponse => WorkerInitResponse);
rpc_message!(FunctionLoadRequest => FunctionLoadRequest, response FunctionLoadResponse);
rpc_message!(FunctionLoadResponse => FunctionLoadResponse);
rpc_message!(InvocationRequest => InvocationRequest, response InvocationResponse);
rpc_message!(InvocationResponse => InvocationResponse);
rpc_message!(WorkerStatusRequest => WorkerStatusRequest, response WorkerStatusResponse);
rpc_message!(WorkerStatusResponse => WorkerStatusResponse);
rpc_message!(InvocationCancel => InvocationCancel);
rpc_message!(RpcLog => RpcLog);
rpc_message!(Failure => Failure);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_format() {
        let id = RequestId::from("req-1");
        let envelope = Envelope::new(
            id.clone(),
            &WorkerInitRequest {
                host_version: "0.1.0".to_string(),
            },
        )
        .unwrap();

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "request_id": "req-1",
                "message_type": "worker_init_request",
                "payload": { "host_version": "0.1.0" },
            })
        );
    }

    #[test]
    fn test_decode_checks_payload_shape() {
        let envelope = Envelope {
            request_id: RequestId::new(),
            message_type: MessageType::InvocationResponse,
            payload: serde_json::json!({ "unexpected": true }),
        };
        let err = envelope.decode::<InvocationResponse>().unwrap_err();
        assert!(matches!(
            err,
            RpcError::Decode {
                message_type: "invocation_response",
                ..
            }
        ));
    }

    #[test]
    fn test_output_bindings_are_tagged() {
        let response: InvocationResponse = serde_json::from_value(serde_json::json!({
            "invocation_id": Uuid::nil(),
            "outputs": [
                { "type": "blob", "path": "output/a.csv", "content": "x" },
                { "type": "queue", "queue": "done", "message": "a" },
            ],
        }))
        .unwrap();

        assert_eq!(
            response.outputs,
            vec![
                OutputBinding::Blob {
                    path: BlobPath::new("output", "a.csv"),
                    content: "x".to_string(),
                },
                OutputBinding::Queue {
                    queue: "done".to_string(),
                    message: "a".to_string(),
                },
            ]
        );
        assert_eq!(response.return_value, None);
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }
}
