//! Agreement protocol messages.
//!
//! This module defines the wire-visible messages of the three-phase
//! protocol plus the out-of-band payload transfer:
//!
//! - [`PrePrepare`] - Leader → All: a digest is bound to a slot
//! - [`Prepare`] - Replica → All: I have seen the pre-prepare for this digest
//! - [`Commit`] - Replica → All: I have seen a prepare quorum for this digest
//! - [`DataMessage`] - Leader → Backup: the full command body for a slot
//!
//! Agreement messages carry only digests; the command body travels solely
//! in [`DataMessage`], keeping the consensus critical path independent of
//! payload size. A commit quorum alone therefore never enables execution:
//! the payload must also have arrived and verified.
//!
//! Message variants form an exhaustive tagged union ([`MessagePayload`]);
//! dispatch is a plain `match`, and a framing layer can tag variants with
//! an integer for the wire.

use std::collections::HashMap;
use std::fmt;

use basalt_kernel::{Command, Value};
use serde::{Deserialize, Serialize};

use crate::types::{Ballot, Digest, ReplicaId, SlotNumber, View};

// ============================================================================
// Client Request / Reply
// ============================================================================

/// A client request admitted into the ordered log.
///
/// The reply path is not a wire field: the replica that admits a request
/// keeps a local reply sender and delivers through it at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// The command to order and execute.
    pub command: Command,

    /// Free-form key/value properties, echoed back in the reply.
    pub properties: HashMap<String, String>,
}

impl Request {
    /// Creates a request with no properties.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            properties: HashMap::new(),
        }
    }

    /// Adds a property to the request.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// The reply produced by executing a committed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    /// The executed command.
    pub command: Command,

    /// The value the state machine produced.
    pub value: Value,

    /// Properties carried over from the request.
    pub properties: HashMap<String, String>,
}

// ============================================================================
// Message Envelope
// ============================================================================

/// A protocol message with routing information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The replica that sent this message.
    pub from: ReplicaId,

    /// The intended recipient; `None` for broadcast messages.
    pub to: Option<ReplicaId>,

    /// The message payload.
    pub payload: MessagePayload,
}

impl Message {
    /// Creates a new targeted message.
    pub fn targeted(from: ReplicaId, to: ReplicaId, payload: MessagePayload) -> Self {
        Self {
            from,
            to: Some(to),
            payload,
        }
    }

    /// Creates a new broadcast message.
    pub fn broadcast(from: ReplicaId, payload: MessagePayload) -> Self {
        Self {
            from,
            to: None,
            payload,
        }
    }

    /// Returns true if this message is a broadcast.
    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }
}

// ============================================================================
// Message Payload
// ============================================================================

/// The payload of a protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessagePayload {
    /// Leader → All: a digest is bound to a slot.
    PrePrepare(PrePrepare),

    /// Replica → All: I have seen the pre-prepare for this digest.
    Prepare(Prepare),

    /// Replica → All: I have seen a prepare quorum for this digest.
    Commit(Commit),

    /// Leader → Backup: the full command body for a slot.
    Data(DataMessage),
}

impl MessagePayload {
    /// Returns the slot this message refers to.
    pub fn slot(&self) -> SlotNumber {
        match self {
            MessagePayload::PrePrepare(m) => m.slot,
            MessagePayload::Prepare(m) => m.slot,
            MessagePayload::Commit(m) => m.slot,
            MessagePayload::Data(m) => m.slot,
        }
    }

    /// Returns a human-readable name for the message type.
    pub fn name(&self) -> &'static str {
        match self {
            MessagePayload::PrePrepare(_) => "PrePrepare",
            MessagePayload::Prepare(_) => "Prepare",
            MessagePayload::Commit(_) => "Commit",
            MessagePayload::Data(_) => "Data",
        }
    }
}

// ============================================================================
// Agreement Messages
// ============================================================================

/// Leader → All: binds a digest to a freshly allocated slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrePrepare {
    /// The leader's ballot at origination.
    pub ballot: Ballot,

    /// The originating replica.
    pub id: ReplicaId,

    /// The view the slot was allocated in.
    pub view: View,

    /// The allocated slot.
    pub slot: SlotNumber,

    /// Digest of the command bound to the slot.
    pub digest: Digest,

    /// True while the sender considers its view active.
    pub active_view: bool,
}

impl PrePrepare {
    /// Creates a new `PrePrepare` message.
    pub fn new(ballot: Ballot, id: ReplicaId, view: View, slot: SlotNumber, digest: Digest) -> Self {
        Self {
            ballot,
            id,
            view,
            slot,
            digest,
            active_view: true,
        }
    }
}

impl fmt::Display for PrePrepare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PrePrepare {{ ballot={}, view={}, slot={} }}",
            self.ballot, self.view, self.slot
        )
    }
}

/// Replica → All: acknowledges the pre-prepare for a (slot, digest) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prepare {
    /// The sender's ballot.
    pub ballot: Ballot,

    /// The acknowledging replica.
    pub id: ReplicaId,

    /// The view of the pre-prepare being acknowledged.
    pub view: View,

    /// The slot being acknowledged.
    pub slot: SlotNumber,

    /// The digest being acknowledged.
    pub digest: Digest,
}

impl Prepare {
    /// Creates a new `Prepare` message.
    pub fn new(ballot: Ballot, id: ReplicaId, view: View, slot: SlotNumber, digest: Digest) -> Self {
        Self {
            ballot,
            id,
            view,
            slot,
            digest,
        }
    }
}

impl fmt::Display for Prepare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Prepare {{ ballot={}, id={}, view={}, slot={} }}",
            self.ballot, self.id, self.view, self.slot
        )
    }
}

/// Replica → All: announces a prepare quorum for a (slot, digest) pair.
///
/// Carries only the digest: execution additionally requires the command
/// body from the payload channel, so a forged commit quorum cannot make a
/// replica execute a command it never received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// The sender's ballot.
    pub ballot: Ballot,

    /// The acknowledging replica.
    pub id: ReplicaId,

    /// The sender's view.
    pub view: View,

    /// The slot being committed.
    pub slot: SlotNumber,

    /// The digest being committed.
    pub digest: Digest,
}

impl Commit {
    /// Creates a new `Commit` message.
    pub fn new(ballot: Ballot, id: ReplicaId, view: View, slot: SlotNumber, digest: Digest) -> Self {
        Self {
            ballot,
            id,
            view,
            slot,
            digest,
        }
    }
}

impl fmt::Display for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Commit {{ ballot={}, id={}, view={}, slot={} }}",
            self.ballot, self.id, self.view, self.slot
        )
    }
}

/// Leader → Backup: out-of-band transfer of the full command body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMessage {
    /// The disseminating replica.
    pub id: ReplicaId,

    /// The slot the request is bound to.
    pub slot: SlotNumber,

    /// The full client request.
    pub request: Request,

    /// Digest the receiver verifies the request against.
    pub digest: Digest,
}

impl DataMessage {
    /// Creates a new `DataMessage`.
    pub fn new(id: ReplicaId, slot: SlotNumber, request: Request, digest: Digest) -> Self {
        Self {
            id,
            slot,
            request,
            digest,
        }
    }
}

impl fmt::Display for DataMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Data {{ id={}, slot={} }}", self.id, self.slot)
    }
}
