//! Ensemble configuration.
//!
//! This module defines the static configuration of a replication ensemble:
//! membership, quorum arithmetic, the view-to-leader mapping, and the
//! protocol timeouts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{byzantine_quorum, max_faulty, ReplicaId, View, MAX_REPLICAS};

// ============================================================================
// Ensemble Configuration
// ============================================================================

/// Configuration for a replication ensemble.
///
/// Membership is immutable once the ensemble is formed; reconfiguration
/// would be a separate protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsembleConfig {
    /// The replica IDs in the ensemble.
    ///
    /// Sorted, free of duplicates, and of size 3f+1.
    replicas: Vec<ReplicaId>,

    /// Protocol timeout configuration.
    pub timeouts: TimeoutConfig,
}

impl EnsembleConfig {
    /// Creates a new ensemble configuration.
    ///
    /// # Panics
    ///
    /// Panics if:
    /// - `replicas` is empty
    /// - `replicas` is not of size 3f+1 (1, 4, 7, ...)
    /// - `replicas` contains duplicates
    /// - `replicas` exceeds `MAX_REPLICAS`
    pub fn new(mut replicas: Vec<ReplicaId>) -> Self {
        assert!(
            !replicas.is_empty(),
            "ensemble must have at least one replica"
        );
        assert!(
            replicas.len() % 3 == 1,
            "ensemble size must be 3f+1 for Byzantine quorums"
        );
        assert!(
            replicas.len() <= MAX_REPLICAS,
            "ensemble size exceeds MAX_REPLICAS"
        );

        replicas.sort();
        for i in 1..replicas.len() {
            assert!(
                replicas[i - 1] != replicas[i],
                "ensemble contains duplicate replica IDs"
            );
        }

        Self {
            replicas,
            timeouts: TimeoutConfig::default(),
        }
    }

    /// Creates a configuration for the smallest fault-tolerant ensemble
    /// (four replicas, IDs 0 through 3).
    pub fn four_replicas() -> Self {
        Self::new((0..4).map(ReplicaId::new).collect())
    }

    /// Returns the number of replicas in the ensemble.
    pub fn ensemble_size(&self) -> usize {
        self.replicas.len()
    }

    /// Returns the quorum size (2f+1) for this ensemble.
    pub fn quorum_size(&self) -> usize {
        byzantine_quorum(self.replicas.len())
    }

    /// Returns the number of faulty replicas this ensemble tolerates.
    pub fn max_faulty(&self) -> usize {
        max_faulty(self.replicas.len())
    }

    /// Returns true if the replica is a member of this ensemble.
    pub fn contains(&self, id: ReplicaId) -> bool {
        self.replicas.contains(&id)
    }

    /// Returns an iterator over replica IDs.
    pub fn replicas(&self) -> impl Iterator<Item = ReplicaId> + '_ {
        self.replicas.iter().copied()
    }

    /// Returns the other replicas (excluding the given replica).
    pub fn others(&self, exclude: ReplicaId) -> impl Iterator<Item = ReplicaId> + '_ {
        self.replicas.iter().copied().filter(move |&r| r != exclude)
    }

    /// Determines the leader for a given view.
    ///
    /// Leadership rotates through the sorted member list by view number.
    pub fn leader_for_view(&self, view: View) -> ReplicaId {
        let index = (view.as_u64() as usize) % self.replicas.len();
        self.replicas[index]
    }

    /// Returns true if `id` leads the given view.
    pub fn is_leader(&self, id: ReplicaId, view: View) -> bool {
        self.leader_for_view(view) == id
    }

    /// Sets the timeout configuration.
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }
}

// ============================================================================
// Timeout Configuration
// ============================================================================

/// Timeout configuration for the replication protocol.
///
/// Two deadlines shape the payload channel: how long a replica waits for a
/// command body to arrive before abandoning a client invocation, and how
/// long a payload send may take to be accepted before it is given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Time a non-leader replica waits for a request's payload to arrive
    /// before abandoning the client invocation.
    pub payload_wait: Duration,

    /// Time a payload send may take to be accepted by a peer's delivery
    /// queue before it is logged and dropped.
    pub send_deadline: Duration,

    /// Interval at which the dispatch loop re-checks for shutdown while
    /// idle.
    pub poll_interval: Duration,
}

impl TimeoutConfig {
    /// Timeouts for production deployments.
    pub fn production() -> Self {
        Self {
            payload_wait: Duration::from_secs(5),
            send_deadline: Duration::from_secs(1),
            poll_interval: Duration::from_millis(10),
        }
    }

    /// Timeouts for local development.
    pub fn development() -> Self {
        Self {
            payload_wait: Duration::from_secs(2),
            send_deadline: Duration::from_millis(500),
            poll_interval: Duration::from_millis(5),
        }
    }

    /// Very short timeouts for fast test execution.
    pub fn simulation() -> Self {
        Self {
            payload_wait: Duration::from_millis(50),
            send_deadline: Duration::from_millis(10),
            poll_interval: Duration::from_millis(1),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self::production()
    }
}
