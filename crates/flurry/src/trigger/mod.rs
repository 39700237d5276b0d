//! Trigger candidates and the decision to run them.

pub mod candidate;
pub mod causality;
pub mod executor;
pub mod reason;

pub use candidate::{CandidateSource, TriggerCandidate};
pub use causality::{CausalityIndex, TriggerEvent};
pub use executor::{
    StoreTimestampReader, TimestampReader, TriggerDecision, TriggerExecutor, should_execute,
};
pub use reason::{TriggerReason, describe};
