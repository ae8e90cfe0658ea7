//! Agreement state: identity, ballot, slot log, and the execution drain.

use std::sync::mpsc::Sender;

use basalt_kernel::Store;
use tracing::{debug, error, trace, warn};

use crate::config::EnsembleConfig;
use crate::entry::{ArrivalHandle, PayloadStatus};
use crate::log::SlotLog;
use crate::message::{Message, MessagePayload, PrePrepare, Reply, Request};
use crate::types::{Ballot, Digest, ReplicaId, SlotNumber, View};

use super::{msg_broadcast, Output};

/// The per-replica agreement state machine.
///
/// Owns the slot log, the execute cursor (inside the log), and the
/// application [`Store`]. All mutation goes through the message handlers
/// and the two client admission paths; the harness serialises calls behind
/// a single lock.
#[derive(Debug)]
pub struct Agreement {
    /// This replica's ID.
    pub(crate) replica_id: ReplicaId,

    /// Ensemble configuration.
    pub(crate) config: EnsembleConfig,

    /// Highest ballot seen or generated.
    pub(crate) ballot: Ballot,

    /// Current view. The core operates within a single view; the field
    /// moves only through ballot catch-up.
    pub(crate) view: View,

    /// Next slot this replica assigns to a locally received request.
    pub(crate) next_slot: SlotNumber,

    /// The slot log and execute cursor.
    pub(crate) log: SlotLog,

    /// The application state machine.
    pub(crate) store: Store,
}

impl Agreement {
    /// Creates the agreement state for one replica.
    ///
    /// # Panics
    ///
    /// Panics (debug) if `replica_id` is not a member of `config`.
    pub fn new(replica_id: ReplicaId, config: EnsembleConfig) -> Self {
        debug_assert!(
            config.contains(replica_id),
            "replica must be an ensemble member"
        );

        let quorum = config.quorum_size();
        Self {
            replica_id,
            config,
            ballot: Ballot::initial(replica_id),
            view: View::ZERO,
            next_slot: SlotNumber::ZERO,
            log: SlotLog::new(quorum),
            store: Store::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns this replica's ID.
    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    /// Returns the current view.
    pub fn view(&self) -> View {
        self.view
    }

    /// Returns the highest ballot seen or generated.
    pub fn ballot(&self) -> Ballot {
        self.ballot
    }

    /// Returns the next slot to apply.
    pub fn execute_cursor(&self) -> SlotNumber {
        self.log.cursor()
    }

    /// Returns true if this replica leads the current view.
    pub fn is_leader(&self) -> bool {
        self.config.is_leader(self.replica_id, self.view)
    }

    /// Returns the application store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Returns the number of live log entries.
    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    // ========================================================================
    // Message Dispatch
    // ========================================================================

    /// Handles one inbound protocol message.
    ///
    /// Total: protocol violations are logged and absorbed, never returned.
    pub fn handle(&mut self, message: Message) -> Output {
        if !self.config.contains(message.from) {
            warn!(from = %message.from, "message from outside the ensemble");
            return Output::empty();
        }
        if let Some(to) = message.to {
            if to != self.replica_id {
                return Output::empty();
            }
        }

        match message.payload {
            MessagePayload::PrePrepare(m) => self.on_pre_prepare(m),
            MessagePayload::Prepare(m) => self.on_prepare(m),
            MessagePayload::Commit(m) => self.on_commit(m),
            MessagePayload::Data(m) => self.on_data(m),
        }
    }

    // ========================================================================
    // Client Admission
    // ========================================================================

    /// Leader path: admits a client request into the ordered log.
    ///
    /// Allocates the next slot, binds the digest, absorbs the request body
    /// as the slot's payload (the originator holds it by construction),
    /// advances the ballot, and directs the caller to broadcast the
    /// PrePrepare and disseminate the body.
    pub fn admit_request(&mut self, request: Request, reply: Option<Sender<Reply>>) -> Output {
        debug_assert!(self.is_leader(), "only the leader admits requests");

        let slot = self.allocate_slot();
        let digest = Digest::of(&request.command);

        if slot.as_u64() % 1000 == 0 {
            debug!(replica = %self.replica_id, %slot, "admission progress");
        }

        let ballot = self.ballot;
        let view = self.view;
        let entry = self.log.find_or_create(slot, ballot, view, Some(digest));
        entry.leader_local = true;
        entry.command = Some(request.command.clone());
        entry.request = Some(request.clone());
        entry.payload_status = PayloadStatus::Received;
        entry.arrival.fire();
        entry.reply = reply;

        self.ballot = self.ballot.next(self.replica_id);

        trace!(
            replica = %self.replica_id,
            %slot,
            %digest,
            ballot = %self.ballot,
            "request admitted"
        );

        let pre_prepare =
            PrePrepare::new(self.ballot, self.replica_id, self.view, slot, digest);
        let mut out = Output::with_messages(vec![msg_broadcast(
            self.replica_id,
            MessagePayload::PrePrepare(pre_prepare),
        )]);
        out.disseminate = Some((slot, request));
        out
    }

    /// Backup path: records a locally received client request.
    ///
    /// Mirrors the leader's slot sequence, attaches the reply sender, and
    /// returns the arrival signal to wait on when the slot's payload has
    /// not arrived yet. Returns no signal when the payload is already
    /// present or the request cannot be registered.
    pub fn register_local(
        &mut self,
        request: Request,
        reply: Sender<Reply>,
    ) -> (SlotNumber, Option<ArrivalHandle>) {
        debug_assert!(!self.is_leader(), "the leader admits, it does not register");

        let slot = self.allocate_slot();
        if self.log.is_below_cursor(slot) {
            warn!(
                replica = %self.replica_id,
                %slot,
                "request arrived after its slot executed; reply unavailable"
            );
            return (slot, None);
        }

        let digest = Digest::of(&request.command);
        let ballot = self.ballot;
        let view = self.view;
        let entry = self.log.find_or_create(slot, ballot, view, None);
        if !entry.bind_digest(digest) {
            warn!(
                replica = %self.replica_id,
                %slot,
                "local request conflicts with the slot's bound digest"
            );
            return (slot, None);
        }
        entry.reply = Some(reply);

        let wait = if entry.payload_status.is_received() {
            None
        } else {
            Some(entry.arrival.clone())
        };
        (slot, wait)
    }

    /// Allocates the next slot in the strictly increasing local sequence.
    fn allocate_slot(&mut self) -> SlotNumber {
        let slot = self.next_slot;
        self.next_slot = self.next_slot.next();
        slot
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Re-evaluates the execution predicate for `slot`, then drains every
    /// contiguously committed slot from the cursor upward.
    pub(crate) fn evaluate_execution(&mut self, slot: SlotNumber, out: &mut Output) {
        if let Some(entry) = self.log.get_mut(slot) {
            entry.refresh_committed();
        }
        out.executed.extend(self.exec());
    }

    /// Applies committed entries in slot order starting at the cursor.
    ///
    /// Each applied entry replies through its attached sender (if any), is
    /// deleted, and moves the cursor forward. A committed slot further up
    /// the log waits until every slot below it has applied.
    fn exec(&mut self) -> Vec<SlotNumber> {
        let mut executed = Vec::new();

        loop {
            let slot = self.log.cursor();
            match self.log.get(slot) {
                Some(entry) if entry.is_committed() && entry.command.is_some() => {}
                Some(entry) if entry.is_committed() => {
                    // Unreachable while the execution predicate includes
                    // payload receipt; bail rather than wedge the cursor.
                    error!(%slot, "committed entry has no command");
                    break;
                }
                _ => break,
            }

            let Some(entry) = self.log.remove(slot) else {
                break;
            };
            let Some(command) = entry.command else {
                break;
            };

            let value = self.store.apply(&command);
            debug!(replica = %self.replica_id, %slot, %command, "applied");

            let properties = entry
                .request
                .map(|request| request.properties)
                .unwrap_or_default();
            let reply = Reply {
                command,
                value,
                properties,
            };
            if let Some(tx) = entry.reply {
                if tx.send(reply).is_err() {
                    trace!(%slot, "reply receiver dropped");
                }
            }

            executed.push(slot);
            self.log.advance_cursor();
        }

        executed
    }
}
