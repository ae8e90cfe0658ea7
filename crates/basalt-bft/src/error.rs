//! Error types for the replication core.
//!
//! Protocol-level anomalies (digest mismatches, stale slots, duplicate
//! acknowledgements) are absorbed inside the handlers and logged; they
//! never surface as errors. What does surface is misuse of the harness
//! itself.

use thiserror::Error;

use crate::types::ReplicaId;

/// Errors surfaced by the replication harness.
#[derive(Debug, Error)]
pub enum BftError {
    /// A node was started with an identity outside the ensemble.
    #[error("replica {0} is not an ensemble member")]
    NotMember(ReplicaId),

    /// A transport endpoint was registered twice for the same replica.
    #[error("replica {0} is already registered")]
    DuplicateMember(ReplicaId),
}

/// Result type for harness operations.
pub type BftResult<T> = Result<T, BftError>;
