use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use flurry_core::BlobPath;

/// Why a function instance ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerReason {
    /// A new or changed blob. `parent` is the instance that wrote it, if known.
    Blob {
        path: BlobPath,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<Uuid>,
    },
    Queue {
        queue: String,
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<Uuid>,
    },
    Timer { interval_secs: u64 },
    /// An explicit request, with a free-form note from the caller.
    Invoke { message: String },
}

impl TriggerReason {
    pub fn parent(&self) -> Option<Uuid> {
        match self {
            TriggerReason::Blob { parent, .. } | TriggerReason::Queue { parent, .. } => *parent,
            TriggerReason::Timer { .. } | TriggerReason::Invoke { .. } => None,
        }
    }

    /// Short tag used as a metrics label and in the worker's trigger metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerReason::Blob { .. } => "blob",
            TriggerReason::Queue { .. } => "queue",
            TriggerReason::Timer { .. } => "timer",
            TriggerReason::Invoke { .. } => "invoke",
        }
    }
}

/// Human readable description of a trigger reason.
pub fn describe(reason: &TriggerReason) -> String {
    match reason {
        TriggerReason::Blob { path, .. } => format!("New blob detected: {path}"),
        TriggerReason::Queue {
            queue, message_id, ..
        } => format!("New queue message detected on '{queue}' ({message_id})"),
        TriggerReason::Timer { interval_secs } => format!("Timer fired (every {interval_secs}s)"),
        TriggerReason::Invoke { message } if message.is_empty() => "Explicit invocation".to_string(),
        TriggerReason::Invoke { message } => format!("Explicit invocation: {message}"),
    }
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&describe(self))
    }
}
