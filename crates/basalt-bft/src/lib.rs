//! # basalt-bft: Byzantine ordered-log replication
//!
//! This crate replicates a totally-ordered log of client commands across a
//! fixed ensemble of N = 3f+1 replicas, staying safe with up to f
//! Byzantine members. Agreement runs the classic three-phase, leader-driven
//! exchange (pre-prepare / prepare / commit) over content digests, while
//! the full command bodies travel on a separate payload channel — the
//! consensus critical path never carries payload bytes.
//!
//! ## Architecture
//!
//! ```text
//! Client ──Request──► ReplicaNode (leader)
//!                        │ allocate slot, digest, admit
//!                        ├── PrePrepare {digest} ──► all replicas
//!                        └── Data {body}     ─────► backups (payload channel)
//!
//! Replica ── Prepare {digest} ──► all        on PrePrepare
//! Replica ── Commit  {digest} ──► all        on 2f+1 Prepares
//! Replica: slot committed                    on 2f+1 Commits
//! Replica: execute in slot order             committed ∧ body verified
//! ```
//!
//! Execution is doubly gated: a slot applies only once both quorums have
//! formed **and** its body has arrived and verified against the agreed
//! digest. A forged commit quorum therefore cannot make a replica execute
//! a command it never received.
//!
//! ## Key Components
//!
//! - [`types`]: identifiers, ballots, digests, quorum arithmetic
//! - [`config`]: ensemble membership and protocol timeouts
//! - [`Agreement`]: the per-replica agreement state machine
//! - [`PayloadChannel`]: background dissemination of command bodies
//! - [`ReplicaNode`]: the harness wiring agreement to a [`Transport`]
//!
//! ## Scope
//!
//! Single-view operation: the leader is a fixed function of the view, and
//! leader rotation / view change is the concern of a layer above, as are
//! message authentication, persistence, and client retransmission.

pub mod config;
pub mod entry;
pub mod error;
pub mod log;
pub mod message;
pub mod node;
pub mod payload;
pub mod quorum;
pub mod replica;
pub mod transport;
pub mod types;

#[cfg(test)]
mod simulation;

// Re-exports for convenient access
pub use config::{EnsembleConfig, TimeoutConfig};
pub use entry::{ArrivalHandle, CommitStatus, LogEntry, PayloadStatus, PrepareStatus};
pub use error::{BftError, BftResult};
pub use log::SlotLog;
pub use message::{
    Commit, DataMessage, Message, MessagePayload, PrePrepare, Prepare, Reply, Request,
};
pub use node::ReplicaNode;
pub use payload::PayloadChannel;
pub use quorum::QuorumSet;
pub use replica::{Agreement, Output};
pub use transport::{Mesh, MeshTransport, MessageSink, Transport};
pub use types::{
    byzantine_quorum, max_faulty, Ballot, Digest, ReplicaId, SlotNumber, View, DIGEST_LENGTH,
    MAX_REPLICAS,
};
