//! Protocol message handlers.
//!
//! This module implements the handlers for the three agreement phases and
//! the payload receiver:
//! - PrePrepare (leader → all)
//! - Prepare (replica → all)
//! - Commit (replica → all)
//! - Data (payload channel receiver)
//!
//! Every handler is total: malformed or conflicting messages are logged
//! and absorbed. Phase statuses are sticky, so replaying any delivered
//! message leaves observable state unchanged.

use tracing::{debug, trace, warn};

use crate::entry::{CommitStatus, PayloadStatus, PrepareStatus};
use crate::message::{Commit, DataMessage, MessagePayload, PrePrepare, Prepare};
use crate::types::Digest;

use super::{msg_broadcast, Agreement, Output};

impl Agreement {
    // ========================================================================
    // PrePrepare Handler
    // ========================================================================

    /// Handles a PrePrepare from the leader.
    ///
    /// Binds the digest to the slot (first sight wins) and answers with a
    /// single Prepare broadcast. A conflicting digest is dropped; a repeat
    /// for an already-answered slot is absorbed.
    pub(crate) fn on_pre_prepare(&mut self, m: PrePrepare) -> Output {
        if self.log.is_below_cursor(m.slot) {
            trace!(slot = %m.slot, "pre-prepare for an applied slot");
            return Output::empty();
        }

        // Catch-up: a newer ballot is adopted wholesale along with its
        // view. A hardened deployment would demand a view-change
        // certificate before following it.
        if m.ballot > self.ballot {
            self.ballot = m.ballot;
            self.view = m.view;
        }

        let ballot = self.ballot;
        let view = self.view;
        let entry = self.log.find_or_create(m.slot, ballot, view, Some(m.digest));

        if !entry.bind_digest(m.digest) {
            warn!(
                replica = %self.replica_id,
                slot = %m.slot,
                digest = %m.digest,
                "pre-prepare conflicts with the bound digest"
            );
            return Output::empty();
        }

        // At most one Prepare per (slot, view).
        if entry.prepare_sent {
            return Output::empty();
        }
        entry.prepare_sent = true;

        trace!(replica = %self.replica_id, slot = %m.slot, "answering pre-prepare");
        let prepare = Prepare::new(ballot, self.replica_id, m.view, m.slot, m.digest);
        Output::with_messages(vec![msg_broadcast(
            self.replica_id,
            MessagePayload::Prepare(prepare),
        )])
    }

    // ========================================================================
    // Prepare Handler
    // ========================================================================

    /// Handles a Prepare acknowledgement.
    ///
    /// Ticks the prepare counter; at the quorum threshold the phase
    /// becomes Prepared (sticky), the counter is reset to release its
    /// memory, and a Commit is broadcast. The execution predicate is
    /// re-tested afterwards.
    pub(crate) fn on_prepare(&mut self, m: Prepare) -> Output {
        let mut out = Output::empty();

        if self.log.is_below_cursor(m.slot) {
            trace!(slot = %m.slot, "prepare for an applied slot");
            return out;
        }

        let ballot = self.ballot;
        let view = self.view;
        let id = self.replica_id;
        let entry = self.log.find_or_create(m.slot, ballot, view, Some(m.digest));

        if !entry.bind_digest(m.digest) {
            warn!(
                replica = %id,
                slot = %m.slot,
                from = %m.id,
                "prepare conflicts with the bound digest"
            );
            return out;
        }

        if !entry.prepare_status.is_prepared() {
            entry.prepare_acks.ack(m.id);
            if entry.prepare_acks.majority() {
                entry.prepare_status = PrepareStatus::Prepared;
                entry.prepare_acks.reset();

                debug!(replica = %id, slot = %m.slot, "prepared");
                let commit = Commit::new(ballot, id, view, m.slot, m.digest);
                out.messages
                    .push(msg_broadcast(id, MessagePayload::Commit(commit)));
            }
        }

        self.evaluate_execution(m.slot, &mut out);
        out
    }

    // ========================================================================
    // Commit Handler
    // ========================================================================

    /// Handles a Commit acknowledgement.
    ///
    /// A commit for an already-applied slot is dropped, as is one for a
    /// slot this replica has no entry for: a commit with no prior
    /// pre-prepare or prepare context is not acted upon.
    pub(crate) fn on_commit(&mut self, m: Commit) -> Output {
        let mut out = Output::empty();

        if self.log.is_below_cursor(m.slot) {
            trace!(slot = %m.slot, "commit for an applied slot");
            return out;
        }

        if !self.log.contains(m.slot) {
            debug!(
                replica = %self.replica_id,
                slot = %m.slot,
                from = %m.id,
                "commit with no prior context"
            );
            return out;
        }

        let entry = self
            .log
            .get_mut(m.slot)
            .expect("entry presence checked above");

        if !entry.bind_digest(m.digest) {
            warn!(
                replica = %self.replica_id,
                slot = %m.slot,
                from = %m.id,
                "commit conflicts with the bound digest"
            );
            return out;
        }

        if !entry.commit_status.is_committed() {
            entry.commit_acks.ack(m.id);
            if entry.commit_acks.majority() {
                entry.commit_status = CommitStatus::Committed;
                debug!(replica = %self.replica_id, slot = %m.slot, "committed");
            }
        }

        self.evaluate_execution(m.slot, &mut out);
        out
    }

    // ========================================================================
    // Payload Receiver
    // ========================================================================

    /// Handles an out-of-band payload delivery.
    ///
    /// The request body is verified against the message's digest before
    /// anything else; a mismatch is dropped without touching the log. On
    /// first receipt the entry absorbs the body, Rstatus becomes Received,
    /// and the arrival signal fires.
    pub(crate) fn on_data(&mut self, m: DataMessage) -> Output {
        let mut out = Output::empty();

        if self.log.is_below_cursor(m.slot) {
            trace!(slot = %m.slot, "payload for an applied slot");
            return out;
        }

        let computed = Digest::of(&m.request.command);
        if computed != m.digest {
            warn!(
                replica = %self.replica_id,
                slot = %m.slot,
                from = %m.id,
                claimed = %m.digest,
                computed = %computed,
                "payload fails digest verification"
            );
            return out;
        }

        let ballot = self.ballot;
        let view = self.view;
        let entry = self.log.find_or_create(m.slot, ballot, view, Some(m.digest));

        if !entry.bind_digest(m.digest) {
            warn!(
                replica = %self.replica_id,
                slot = %m.slot,
                "payload conflicts with the bound digest"
            );
            return out;
        }

        if !entry.payload_status.is_received() {
            entry.command = Some(m.request.command.clone());
            entry.request = Some(m.request);
            entry.payload_status = PayloadStatus::Received;
            entry.arrival.fire();
            trace!(replica = %self.replica_id, slot = %m.slot, "payload received");
        }

        self.evaluate_execution(m.slot, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use basalt_kernel::{Command, Key};

    use super::*;
    use crate::config::{EnsembleConfig, TimeoutConfig};
    use crate::message::Request;
    use crate::types::{Ballot, ReplicaId, SlotNumber, View};

    fn test_config() -> EnsembleConfig {
        EnsembleConfig::four_replicas().with_timeouts(TimeoutConfig::simulation())
    }

    fn backup() -> Agreement {
        Agreement::new(ReplicaId::new(1), test_config())
    }

    fn test_request(tag: u64) -> Request {
        Request::new(Command::put(Key::new(tag), vec![tag as u8]))
    }

    fn leader_ballot() -> Ballot {
        Ballot::new(1, ReplicaId::new(0))
    }

    fn pre_prepare(slot: u64, digest: Digest) -> PrePrepare {
        PrePrepare::new(
            leader_ballot(),
            ReplicaId::new(0),
            View::ZERO,
            SlotNumber::new(slot),
            digest,
        )
    }

    fn prepare_from(id: u8, slot: u64, digest: Digest) -> Prepare {
        Prepare::new(
            leader_ballot(),
            ReplicaId::new(id),
            View::ZERO,
            SlotNumber::new(slot),
            digest,
        )
    }

    fn commit_from(id: u8, slot: u64, digest: Digest) -> Commit {
        Commit::new(
            leader_ballot(),
            ReplicaId::new(id),
            View::ZERO,
            SlotNumber::new(slot),
            digest,
        )
    }

    fn data(slot: u64, request: Request) -> DataMessage {
        let digest = Digest::of(&request.command);
        DataMessage::new(ReplicaId::new(0), SlotNumber::new(slot), request, digest)
    }

    #[test]
    fn pre_prepare_answers_with_prepare_broadcast() {
        let mut state = backup();
        let digest = Digest::of(&test_request(1).command);

        let out = state.on_pre_prepare(pre_prepare(0, digest));

        assert_eq!(out.messages.len(), 1);
        let msg = &out.messages[0];
        assert!(msg.is_broadcast());
        match &msg.payload {
            MessagePayload::Prepare(p) => {
                assert_eq!(p.id, ReplicaId::new(1));
                assert_eq!(p.slot, SlotNumber::ZERO);
                assert_eq!(p.digest, digest);
            }
            other => panic!("expected Prepare, got {}", other.name()),
        }
    }

    #[test]
    fn at_most_one_prepare_per_slot() {
        let mut state = backup();
        let digest = Digest::of(&test_request(1).command);

        let first = state.on_pre_prepare(pre_prepare(0, digest));
        let second = state.on_pre_prepare(pre_prepare(0, digest));

        assert_eq!(first.messages.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn pre_prepare_adopts_higher_ballot() {
        let mut state = backup();
        let digest = Digest::of(&test_request(1).command);
        let high = Ballot::new(9, ReplicaId::new(0));

        let m = PrePrepare::new(high, ReplicaId::new(0), View::ZERO, SlotNumber::ZERO, digest);
        state.on_pre_prepare(m);

        assert_eq!(state.ballot(), high);
    }

    #[test]
    fn conflicting_pre_prepare_is_dropped() {
        let mut state = backup();
        let bound = Digest::of(&test_request(1).command);
        let forged = Digest::of(&test_request(2).command);

        state.on_pre_prepare(pre_prepare(0, bound));
        let out = state.on_pre_prepare(pre_prepare(0, forged));

        assert!(out.is_empty());
        assert_eq!(
            state.log.get(SlotNumber::ZERO).expect("entry").digest(),
            Some(bound)
        );
    }

    #[test]
    fn prepare_quorum_broadcasts_commit() {
        let mut state = backup();
        let digest = Digest::of(&test_request(1).command);

        assert!(state.on_prepare(prepare_from(0, 0, digest)).is_empty());
        assert!(state.on_prepare(prepare_from(2, 0, digest)).is_empty());
        let out = state.on_prepare(prepare_from(3, 0, digest));

        assert_eq!(out.messages.len(), 1);
        assert!(matches!(out.messages[0].payload, MessagePayload::Commit(_)));

        let entry = state.log.get(SlotNumber::ZERO).expect("entry");
        assert!(entry.prepare_status.is_prepared());
        assert!(entry.prepare_acks.is_empty()); // reset after the quorum
    }

    #[test]
    fn duplicate_prepares_do_not_form_a_quorum() {
        let mut state = backup();
        let digest = Digest::of(&test_request(1).command);

        state.on_prepare(prepare_from(0, 0, digest));
        state.on_prepare(prepare_from(0, 0, digest));
        let out = state.on_prepare(prepare_from(0, 0, digest));

        assert!(out.is_empty());
        let entry = state.log.get(SlotNumber::ZERO).expect("entry");
        assert!(!entry.prepare_status.is_prepared());
        assert_eq!(entry.prepare_acks.len(), 1);
    }

    #[test]
    fn mismatched_prepare_does_not_tick_the_counter() {
        let mut state = backup();
        let bound = Digest::of(&test_request(1).command);
        let forged = Digest::of(&test_request(2).command);

        state.on_pre_prepare(pre_prepare(0, bound));

        // Byzantine peer acknowledges a digest the slot is not bound to.
        let out = state.on_prepare(prepare_from(3, 0, forged));
        assert!(out.is_empty());

        let entry = state.log.get(SlotNumber::ZERO).expect("entry");
        assert!(!entry.prepare_acks.contains(ReplicaId::new(3)));
    }

    #[test]
    fn commit_without_prior_context_is_dropped() {
        let mut state = backup();
        let digest = Digest::of(&test_request(1).command);

        let out = state.on_commit(commit_from(2, 0, digest));

        assert!(out.is_empty());
        assert!(!state.log.contains(SlotNumber::ZERO));
    }

    #[test]
    fn commit_below_cursor_is_dropped() {
        let mut state = backup();
        crate::replica::testing::drive_slot_to_execution(&mut state, 0, 0);
        assert_eq!(state.execute_cursor(), SlotNumber::new(1));

        let digest = Digest::of(&test_request(0).command);
        let out = state.on_commit(commit_from(2, 0, digest));

        assert!(out.is_empty());
        assert!(!state.log.contains(SlotNumber::ZERO)); // not resurrected
    }

    #[test]
    fn commit_before_prepare_converges() {
        let mut state = backup();
        let request = test_request(1);
        let digest = Digest::of(&request.command);

        // The pre-prepare created the entry; commits from faster peers
        // overtake their prepares.
        state.on_pre_prepare(pre_prepare(0, digest));
        for id in [0u8, 2, 3] {
            state.on_commit(commit_from(id, 0, digest));
        }
        {
            let entry = state.log.get(SlotNumber::ZERO).expect("entry");
            assert!(entry.commit_status.is_committed());
            assert!(!entry.prepare_status.is_prepared());
        }

        // The prepares and the payload arrive afterwards.
        for id in [0u8, 2, 3] {
            state.on_prepare(prepare_from(id, 0, digest));
        }
        let out = state.on_data(data(0, request));

        assert_eq!(out.executed, vec![SlotNumber::ZERO]);
        assert_eq!(state.execute_cursor(), SlotNumber::new(1));
    }

    #[test]
    fn execution_requires_the_payload() {
        let mut state = backup();
        let request = test_request(1);
        let digest = Digest::of(&request.command);

        state.on_pre_prepare(pre_prepare(0, digest));
        for id in [0u8, 2, 3] {
            state.on_prepare(prepare_from(id, 0, digest));
        }
        for id in [0u8, 2, 3] {
            state.on_commit(commit_from(id, 0, digest));
        }

        // Prepared and committed, but the body never arrived.
        assert_eq!(state.execute_cursor(), SlotNumber::ZERO);
        {
            let entry = state.log.get(SlotNumber::ZERO).expect("entry");
            assert!(entry.prepare_status.is_prepared());
            assert!(entry.commit_status.is_committed());
            assert!(!entry.is_committed());
        }

        // Late payload unblocks execution.
        let out = state.on_data(data(0, request));
        assert_eq!(out.executed, vec![SlotNumber::ZERO]);
        assert_eq!(state.execute_cursor(), SlotNumber::new(1));
        assert_eq!(state.store().get(Key::new(1)), Some(&[1u8][..]));
    }

    #[test]
    fn corrupt_payload_is_rejected() {
        let mut state = backup();
        let request = test_request(1);
        let wrong = Digest::of(&test_request(2).command);

        let out = state.on_data(DataMessage::new(
            ReplicaId::new(0),
            SlotNumber::ZERO,
            request,
            wrong,
        ));

        assert!(out.is_empty());
        assert!(!state.log.contains(SlotNumber::ZERO));
    }

    #[test]
    fn execution_drains_in_slot_order() {
        let mut state = backup();

        // Slot 1 fully commits first; nothing may apply yet.
        crate::replica::testing::drive_slot_to_execution(&mut state, 1, 0);
        assert_eq!(state.execute_cursor(), SlotNumber::ZERO);
        assert!(state.log.contains(SlotNumber::new(1)));

        // Completing slot 0 releases both, in order.
        crate::replica::testing::drive_slot_to_execution(&mut state, 0, 0);
        assert_eq!(state.execute_cursor(), SlotNumber::new(2));
        assert!(state.log.is_empty());
        assert_eq!(state.store().get(Key::new(0)), Some(&[0u8][..]));
        assert_eq!(state.store().get(Key::new(1)), Some(&[1u8][..]));
    }

    #[test]
    fn replaying_every_message_changes_nothing() {
        let mut state = backup();
        let request = test_request(1);
        let digest = Digest::of(&request.command);

        let messages = |state: &mut Agreement| {
            state.on_pre_prepare(pre_prepare(0, digest));
            state.on_data(data(0, request.clone()));
            for id in [0u8, 2, 3] {
                state.on_prepare(prepare_from(id, 0, digest));
            }
            for id in [0u8, 2, 3] {
                state.on_commit(commit_from(id, 0, digest));
            }
        };

        messages(&mut state);
        let cursor = state.execute_cursor();
        let store = state.store().clone();
        let log_len = state.log_len();

        // Deliver the entire history a second time.
        messages(&mut state);

        assert_eq!(state.execute_cursor(), cursor);
        assert_eq!(state.store(), &store);
        assert_eq!(state.log_len(), log_len);
    }
}
