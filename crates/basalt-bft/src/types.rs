//! Core identifiers for the agreement protocol.
//!
//! This module defines the small, totally-ordered value types the protocol
//! is built from:
//! - [`ReplicaId`] - Unique identifier for a replica in the ensemble
//! - [`View`] - Monotonically increasing leadership epoch
//! - [`Ballot`] - Lexicographically ordered (counter, owner) pair
//! - [`SlotNumber`] - Position in the totally-ordered log
//! - [`Digest`] - Fixed-width content hash of a command

use std::fmt::{self, Debug, Display};

use basalt_kernel::Command;
use serde::{Deserialize, Serialize};

// ============================================================================
// Replica Identifier
// ============================================================================

/// Maximum number of replicas in an ensemble.
///
/// Byzantine agreement needs 3f+1 replicas to tolerate f faults; realistic
/// ensembles are 4-13 replicas, so a single byte is plenty.
pub const MAX_REPLICAS: usize = 255;

/// Unique identifier for a replica in the ensemble.
///
/// Assigned at ensemble formation and never changes. The total order on
/// IDs is what makes ballots comparable across replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaId(u8);

impl ReplicaId {
    /// Creates a new replica ID.
    pub fn new(id: u8) -> Self {
        debug_assert!(
            (id as usize) < MAX_REPLICAS,
            "replica ID exceeds MAX_REPLICAS"
        );
        Self(id)
    }

    /// Returns the replica ID as a `u8`.
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Returns the replica ID as a `usize` for indexing.
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

impl From<u8> for ReplicaId {
    fn from(id: u8) -> Self {
        Self::new(id)
    }
}

// ============================================================================
// View
// ============================================================================

/// Monotonically increasing leadership epoch.
///
/// Exactly one replica leads each view. The core operates within a single
/// view; the type still carries `next()` as the seam a leader-rotation
/// protocol would advance through.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct View(u64);

impl View {
    /// The initial view.
    pub const ZERO: View = View(0);

    /// Creates a new view number.
    pub fn new(view: u64) -> Self {
        Self(view)
    }

    /// Returns the view as a `u64`.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns the next view.
    pub fn next(&self) -> Self {
        View(self.0.saturating_add(1))
    }
}

impl Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// ============================================================================
// Ballot
// ============================================================================

/// Totally-ordered (counter, owner) pair used to break ties between
/// would-be leaders.
///
/// Ballots compare lexicographically: first on the counter, then on the
/// owning replica's ID. `next` increments the counter and rewrites the
/// owner, so the advancing replica's ballot dominates every ballot it has
/// seen.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Ballot {
    counter: u64,
    owner: ReplicaId,
}

impl Ballot {
    /// Creates a ballot with an explicit counter and owner.
    pub fn new(counter: u64, owner: ReplicaId) -> Self {
        Self { counter, owner }
    }

    /// The zero ballot a replica starts from.
    pub fn initial(owner: ReplicaId) -> Self {
        Self { counter: 0, owner }
    }

    /// Returns the ballot counter.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Returns the replica that owns this ballot.
    pub fn owner(&self) -> ReplicaId {
        self.owner
    }

    /// Returns the successor ballot owned by `id`.
    pub fn next(&self, id: ReplicaId) -> Self {
        Self {
            counter: self.counter.saturating_add(1),
            owner: id,
        }
    }
}

impl Display for Ballot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}.{}", self.counter, self.owner)
    }
}

// ============================================================================
// Slot Number
// ============================================================================

/// Position in the totally-ordered log; one command per slot.
///
/// The leader assigns slots as a strictly increasing sequence starting
/// at 0.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SlotNumber(u64);

impl SlotNumber {
    /// The first slot.
    pub const ZERO: SlotNumber = SlotNumber(0);

    /// Creates a new slot number.
    pub fn new(slot: u64) -> Self {
        Self(slot)
    }

    /// Returns the slot as a `u64`.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns the next slot.
    pub fn next(&self) -> Self {
        SlotNumber(self.0.saturating_add(1))
    }
}

impl Display for SlotNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl From<u64> for SlotNumber {
    fn from(slot: u64) -> Self {
        Self(slot)
    }
}

// ============================================================================
// Digest
// ============================================================================

/// Length of a content digest in bytes.
pub const DIGEST_LENGTH: usize = 16;

/// Fixed-width content hash of a command.
///
/// Agreement messages carry only the digest; the full command body travels
/// on the payload channel and is verified against the digest on arrival.
/// Computed as BLAKE3 over the command's canonical byte encoding, truncated
/// to 16 bytes. The function only has to resist accidental mismatches;
/// signed authentication is a layer above.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest([u8; DIGEST_LENGTH]);

impl Digest {
    /// Computes the digest of a command.
    pub fn of(command: &Command) -> Self {
        let hash = blake3::hash(&command.canonical_bytes());
        let mut bytes = [0u8; DIGEST_LENGTH];
        bytes.copy_from_slice(&hash.as_bytes()[..DIGEST_LENGTH]);
        Self(bytes)
    }

    /// Creates a digest from raw bytes.
    pub fn from_bytes(bytes: [u8; DIGEST_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the digest as a byte slice.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LENGTH] {
        &self.0
    }
}

impl Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Digest({:02x}{:02x}{:02x}{:02x}...)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Quorum helpers
// ============================================================================

/// Calculates the Byzantine quorum size for an ensemble.
///
/// An ensemble of N = 3f+1 replicas needs 2f+1 acknowledgements, i.e.
/// ⌈(2N+1)/3⌉, so that any two quorums intersect in at least f+1 replicas
/// and therefore in at least one honest one.
///
/// # Panics
///
/// Panics (debug) if `ensemble_size` is 0.
pub fn byzantine_quorum(ensemble_size: usize) -> usize {
    debug_assert!(ensemble_size > 0, "ensemble size must be positive");
    (2 * ensemble_size + 3) / 3
}

/// Returns the number of faulty replicas an ensemble can tolerate.
///
/// For 3f+1 replicas, f faults are survivable.
pub fn max_faulty(ensemble_size: usize) -> usize {
    ensemble_size.saturating_sub(1) / 3
}
