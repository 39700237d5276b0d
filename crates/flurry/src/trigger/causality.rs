//! Parent/child links between function instances.
//!
//! Links are derived from an append-only list of trigger events. Instances
//! refer to each other by id only.

use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use flurry_core::BlobPath;

use super::TriggerReason;

/// One instance starting for a reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    pub instance: Uuid,
    pub function: String,
    pub reason: TriggerReason,
}

#[derive(Debug, Default)]
pub struct CausalityIndex {
    events: Vec<TriggerEvent>,
    parents: HashMap<Uuid, Uuid>,
    children: HashMap<Uuid, BTreeSet<Uuid>>,
    blob_writers: HashMap<BlobPath, Uuid>,
    message_writers: HashMap<String, Uuid>,
}

impl CausalityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a trigger event and index its parent link.
    pub fn record(&mut self, event: TriggerEvent) {
        if let Some(parent) = event.reason.parent() {
            self.parents.insert(event.instance, parent);
            self.children.entry(parent).or_default().insert(event.instance);
        }
        self.events.push(event);
    }

    /// Remember that `instance` wrote `path` through an output binding.
    pub fn record_blob_write(&mut self, path: BlobPath, instance: Uuid) {
        self.blob_writers.insert(path, instance);
    }

    /// Remember that `instance` enqueued the message with `message_id`.
    pub fn record_message_write(&mut self, message_id: String, instance: Uuid) {
        self.message_writers.insert(message_id, instance);
    }

    /// The instance that last wrote `path`, if this host wrote it.
    pub fn blob_writer(&self, path: &BlobPath) -> Option<Uuid> {
        self.blob_writers.get(path).copied()
    }

    pub fn message_writer(&self, message_id: &str) -> Option<Uuid> {
        self.message_writers.get(message_id).copied()
    }

    pub fn parent(&self, instance: Uuid) -> Option<Uuid> {
        self.parents.get(&instance).copied()
    }

    pub fn children(&self, instance: Uuid) -> impl Iterator<Item = Uuid> + '_ {
        self.children
            .get(&instance)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Parent chain of `instance`, nearest first. Stops if a link repeats.
    pub fn ancestors(&self, instance: Uuid) -> Vec<Uuid> {
        let mut chain = Vec::new();
        let mut current = instance;
        while let Some(parent) = self.parent(current) {
            if parent == instance || chain.contains(&parent) {
                break;
            }
            chain.push(parent);
            current = parent;
        }
        chain
    }

    pub fn events(&self) -> &[TriggerEvent] {
        &self.events
    }
}
