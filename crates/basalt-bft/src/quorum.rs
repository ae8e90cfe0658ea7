//! Quorum counting over distinct replica acknowledgements.

use std::collections::HashSet;

use crate::types::ReplicaId;

/// A set of distinct replica acknowledgements for one protocol phase.
///
/// The counter has no notion of which phase it serves; the agreement state
/// machine owns that mapping. Duplicate acknowledgements from the same
/// replica are absorbed silently, so a Byzantine peer cannot inflate a
/// quorum by repeating itself.
#[derive(Debug, Clone)]
pub struct QuorumSet {
    threshold: usize,
    acks: HashSet<ReplicaId>,
}

impl QuorumSet {
    /// Creates an empty counter that reports a quorum at `threshold`
    /// distinct acknowledgements.
    pub fn new(threshold: usize) -> Self {
        debug_assert!(threshold > 0, "quorum threshold must be positive");
        Self {
            threshold,
            acks: HashSet::new(),
        }
    }

    /// Records an acknowledgement from `id`.
    ///
    /// Idempotent: returns true only the first time `id` is seen.
    pub fn ack(&mut self, id: ReplicaId) -> bool {
        self.acks.insert(id)
    }

    /// Returns true once the counter holds a quorum of distinct replicas.
    pub fn majority(&self) -> bool {
        self.acks.len() >= self.threshold
    }

    /// Empties the counter.
    ///
    /// Phases are sticky through the owning entry's status flags, so a
    /// reached counter can be reset to release its memory.
    pub fn reset(&mut self) {
        self.acks.clear();
    }

    /// Returns the number of distinct acknowledgements recorded.
    pub fn len(&self) -> usize {
        self.acks.len()
    }

    /// Returns true if no acknowledgements are recorded.
    pub fn is_empty(&self) -> bool {
        self.acks.is_empty()
    }

    /// Returns true if `id` has acknowledged.
    pub fn contains(&self, id: ReplicaId) -> bool {
        self.acks.contains(&id)
    }
}
