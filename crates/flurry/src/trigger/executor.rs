//! Staleness and self-trigger suppression for blob candidates.
//!
//! A candidate runs when one of the function's declared outputs for that
//! input is missing or older than the input. Only an input and its own
//! outputs are ever compared, since blob timestamps are only monotonic per
//! blob. A candidate that is itself one of the function's outputs, and whose
//! source input is no newer, never runs again.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use flurry_core::emit;
use flurry_core::metrics::events::{DecisionKind, TriggerDecisionMade};
use flurry_core::{BlobPath, BlobStore, StorageError};

use crate::blob::{BlobPathPattern, Bindings};

/// Source of fresh blob modification times.
#[async_trait]
pub trait TimestampReader: Send + Sync {
    /// Last modification time of `path`, or `None` if it does not exist.
    async fn last_modified(&self, path: &BlobPath) -> Result<Option<DateTime<Utc>>, StorageError>;
}

/// [`TimestampReader`] backed by blob attribute fetches.
#[derive(Clone)]
pub struct StoreTimestampReader {
    store: Arc<dyn BlobStore>,
}

impl StoreTimestampReader {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TimestampReader for StoreTimestampReader {
    async fn last_modified(&self, path: &BlobPath) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(self
            .store
            .fetch_attributes(path)
            .await?
            .map(|attributes| attributes.last_modified))
    }
}

/// Decide whether `input` should trigger a run producing `outputs`.
///
/// An output whose timestamp cannot be read counts as missing.
pub async fn should_execute(
    input: &BlobPath,
    outputs: &[BlobPath],
    reader: &dyn TimestampReader,
) -> Result<bool, StorageError> {
    Ok(compare(input, outputs, reader).await? == DecisionKind::Execute)
}

async fn compare(
    input: &BlobPath,
    outputs: &[BlobPath],
    reader: &dyn TimestampReader,
) -> Result<DecisionKind, StorageError> {
    if outputs.is_empty() {
        return Ok(DecisionKind::Execute);
    }

    let Some(input_time) = reader.last_modified(input).await? else {
        return Ok(DecisionKind::InputMissing);
    };

    for output in outputs {
        let output_time = match reader.last_modified(output).await {
            Ok(time) => time,
            Err(e) => {
                warn!(output = %output, error = %e, "Failed to read output timestamp, treating as missing");
                None
            }
        };
        match output_time {
            None => return Ok(DecisionKind::Execute),
            Some(time) if input_time > time => return Ok(DecisionKind::Execute),
            Some(_) => {}
        }
    }
    Ok(DecisionKind::UpToDate)
}

/// Outcome of evaluating a blob against one function's trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerDecision {
    /// Run the function with these template bindings.
    Execute { bindings: Bindings },
    /// The blob does not match the function's trigger template.
    NoMatch,
    /// The blob no longer exists.
    InputMissing,
    /// Every declared output is at least as new as the blob.
    UpToDate,
}

impl TriggerDecision {
    pub fn kind(&self) -> DecisionKind {
        match self {
            TriggerDecision::Execute { .. } => DecisionKind::Execute,
            TriggerDecision::NoMatch => DecisionKind::NoMatch,
            TriggerDecision::InputMissing => DecisionKind::InputMissing,
            TriggerDecision::UpToDate => DecisionKind::UpToDate,
        }
    }

    pub fn should_execute(&self) -> bool {
        matches!(self, TriggerDecision::Execute { .. })
    }
}

/// Evaluates blob candidates against function trigger and output templates.
#[derive(Clone)]
pub struct TriggerExecutor {
    reader: Arc<dyn TimestampReader>,
}

impl std::fmt::Debug for TriggerExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TriggerExecutor")
    }
}

impl TriggerExecutor {
    pub fn new(reader: Arc<dyn TimestampReader>) -> Self {
        Self { reader }
    }

    /// Resolve `outputs` with the bindings captured by `trigger` from `blob`.
    ///
    /// Outputs that do not resolve to a valid path are left out.
    pub fn resolve_outputs(
        function: &str,
        outputs: &[BlobPathPattern],
        bindings: &Bindings,
    ) -> Vec<BlobPath> {
        outputs
            .iter()
            .filter_map(|output| match output.apply_names(bindings) {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(function, output = %output, error = %e, "Cannot resolve output path");
                    None
                }
            })
            .collect()
    }

    /// Whether `blob` is an output this function already produced from an
    /// input that is no newer than it.
    async fn is_byproduct(
        &self,
        function: &str,
        trigger: &BlobPathPattern,
        outputs: &[BlobPathPattern],
        blob: &BlobPath,
    ) -> Result<bool, StorageError> {
        let mut sources = Vec::new();
        for output in outputs {
            let Some(bindings) = output.matches(blob) else {
                continue;
            };
            match trigger.apply_names(&bindings) {
                Ok(source) if source != *blob => sources.push(source),
                Ok(_) => {}
                Err(e) => debug!(function, output = %output, error = %e, "Output does not map back to an input"),
            }
        }
        if sources.is_empty() {
            return Ok(false);
        }

        let Some(blob_time) = self.reader.last_modified(blob).await? else {
            return Ok(false);
        };
        for source in sources {
            if let Some(source_time) = self.reader.last_modified(&source).await?
                && source_time <= blob_time
            {
                debug!(function, blob = %blob, source = %source, "Blob is an output of an earlier run");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Decide whether `blob` triggers `function`.
    pub async fn evaluate(
        &self,
        function: &str,
        trigger: &BlobPathPattern,
        outputs: &[BlobPathPattern],
        blob: &BlobPath,
    ) -> Result<TriggerDecision, StorageError> {
        let decision = match trigger.matches(blob) {
            None => TriggerDecision::NoMatch,
            Some(_) if self.is_byproduct(function, trigger, outputs, blob).await? => {
                TriggerDecision::UpToDate
            }
            Some(bindings) => {
                let resolved = Self::resolve_outputs(function, outputs, &bindings);
                match compare(blob, &resolved, self.reader.as_ref()).await? {
                    DecisionKind::Execute => TriggerDecision::Execute { bindings },
                    DecisionKind::InputMissing => TriggerDecision::InputMissing,
                    _ => TriggerDecision::UpToDate,
                }
            }
        };

        if decision != TriggerDecision::NoMatch {
            debug!(function, blob = %blob, decision = ?decision.kind(), "Evaluated blob trigger");
            emit!(TriggerDecisionMade {
                function: function.to_string(),
                decision: decision.kind(),
            });
        }
        Ok(decision)
    }
}
