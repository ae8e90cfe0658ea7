//! The agreement state machine.
//!
//! This module implements the three-phase, leader-driven agreement protocol
//! over the slot log, decoupled from all I/O: handlers mutate the state and
//! return an [`Output`] describing what the caller should send.
//!
//! # Protocol Overview
//!
//! ```text
//! Client ──Request──► Leader
//!                       │ allocate slot, bind digest
//!                       ├──PrePrepare (digest only)──► All
//!                       ├──Data (full body)──────────► Backups
//!                       │
//! Replica ──Prepare──► All          (on PrePrepare)
//! Replica ──Commit───► All          (on 2f+1 Prepares)
//! Replica: committed                (on 2f+1 Commits)
//! Replica: execute                  (committed ∧ payload received,
//!                                    in slot order from the cursor)
//! ```
//!
//! # Concurrency contract
//!
//! The state machine itself is single-threaded; the harness serialises all
//! access behind one lock and sends the returned messages after releasing
//! it. Every status transition completes before the handler returns, so
//! deferred sending cannot reorder observable state.
//!
//! # Self-delivery
//!
//! Broadcasts loop back to the sender through the transport. Quorum
//! counters are therefore fed exclusively by inbound messages; no handler
//! ticks its own counter directly.

mod normal;
mod state;

pub use state::Agreement;

use crate::message::{Message, MessagePayload, Request};
use crate::types::{ReplicaId, SlotNumber};

// ============================================================================
// Handler Output
// ============================================================================

/// Output produced by an agreement handler.
///
/// The harness is responsible for:
/// 1. Broadcasting/sending the outgoing messages
/// 2. Handing the dissemination directive to the payload channel
/// 3. Surfacing executed slots to observers
#[derive(Debug, Default)]
pub struct Output {
    /// Messages to send to other replicas.
    pub messages: Vec<Message>,

    /// Request body to disseminate on the payload channel, if the handler
    /// originated a slot.
    pub disseminate: Option<(SlotNumber, Request)>,

    /// Slots applied to the state machine by this handler call, in order.
    pub executed: Vec<SlotNumber>,
}

impl Output {
    /// Creates an empty output.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates output carrying only messages.
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Returns true if the handler produced nothing observable.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.disseminate.is_none() && self.executed.is_empty()
    }
}

/// Creates a broadcast message from this replica.
pub(crate) fn msg_broadcast(from: ReplicaId, payload: MessagePayload) -> Message {
    Message::broadcast(from, payload)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared helpers for driving a single agreement instance in tests.

    use basalt_kernel::{Command, Key};

    use crate::message::{Commit, DataMessage, PrePrepare, Prepare};
    use crate::types::{Ballot, Digest, ReplicaId, SlotNumber, View};

    use super::Agreement;

    /// Feeds one slot through pre-prepare, payload, a prepare quorum, and
    /// a commit quorum, from the perspective of `state`.
    ///
    /// `tag` seeds the command and doubles as the slot number; `leader`
    /// is the originating replica's raw ID. Acks come from the three
    /// ensemble members other than `state` itself, which is exactly a
    /// quorum in the four-replica ensemble.
    pub fn drive_slot_to_execution(state: &mut Agreement, tag: u64, leader: u8) {
        let slot = SlotNumber::new(tag);
        let request = crate::message::Request::new(Command::put(Key::new(tag), vec![tag as u8]));
        let digest = Digest::of(&request.command);
        let leader_id = ReplicaId::new(leader);
        let ballot = Ballot::new(1, leader_id);

        state.on_pre_prepare(PrePrepare::new(ballot, leader_id, View::ZERO, slot, digest));
        state.on_data(DataMessage::new(leader_id, slot, request, digest));

        let mine = state.replica_id().as_u8();
        let voters: Vec<ReplicaId> = (0..4u8)
            .filter(|id| *id != mine)
            .map(ReplicaId::new)
            .collect();

        for id in &voters {
            state.on_prepare(Prepare::new(ballot, *id, View::ZERO, slot, digest));
        }
        for id in &voters {
            state.on_commit(Commit::new(ballot, *id, View::ZERO, slot, digest));
        }
    }
}
