//! Out-of-process worker protocol.
//!
//! - `message` - Envelope and payload types
//! - `channel` - Call correlation, timeouts and cancellation
//! - `transport` - Line-framed and in-process connections
//! - `process` - Worker child processes
//! - `worker` - Serving the worker side in-process

pub mod channel;
pub mod message;
pub mod process;
pub mod transport;
pub mod worker;

pub use channel::{ChannelContext, PendingResponse, WorkerChannel};
pub use message::{
    Envelope, MessageType, OutputBinding, RequestId, RpcMessage, RpcRequest,
};
pub use process::WorkerProcess;
pub use transport::{WorkerEndpoint, framed, memory_pair};
pub use worker::{FunctionWorker, serve};
