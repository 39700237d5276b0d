use flurry_core::metrics::events::DiscoverySource;
use flurry_core::{BlobPath, QueueMessage};

/// What a candidate would trigger on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateSource {
    Blob(BlobPath),
    Queue(QueueMessage),
}

/// A blob or message that may trigger a function. Created per tick, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerCandidate {
    pub source: CandidateSource,
    pub discovered_via: DiscoverySource,
}

impl TriggerCandidate {
    pub fn blob(path: BlobPath, discovered_via: DiscoverySource) -> Self {
        Self {
            source: CandidateSource::Blob(path),
            discovered_via,
        }
    }

    pub fn queue(message: QueueMessage) -> Self {
        Self {
            source: CandidateSource::Queue(message),
            discovered_via: DiscoverySource::Queue,
        }
    }

    pub fn blob_path(&self) -> Option<&BlobPath> {
        match &self.source {
            CandidateSource::Blob(path) => Some(path),
            CandidateSource::Queue(_) => None,
        }
    }

    pub fn message(&self) -> Option<&QueueMessage> {
        match &self.source {
            CandidateSource::Queue(message) => Some(message),
            CandidateSource::Blob(_) => None,
        }
    }
}
