//! Per-slot log entries and the payload-arrival signal.

use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use basalt_kernel::Command;

use crate::message::{Reply, Request};
use crate::quorum::QuorumSet;
use crate::types::{Ballot, Digest, View};

// ============================================================================
// Phase Statuses
// ============================================================================

/// Prepare-phase status of an entry.
///
/// Transitions away from `None` exactly once and never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrepareStatus {
    /// No prepare quorum yet.
    #[default]
    None,
    /// A prepare quorum was observed.
    Prepared,
}

impl PrepareStatus {
    /// Returns true once a prepare quorum was observed.
    pub fn is_prepared(&self) -> bool {
        matches!(self, PrepareStatus::Prepared)
    }
}

/// Commit-phase status of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitStatus {
    /// No commit quorum yet.
    #[default]
    None,
    /// A commit quorum was observed.
    Committed,
}

impl CommitStatus {
    /// Returns true once a commit quorum was observed.
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitStatus::Committed)
    }
}

/// Payload status of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadStatus {
    /// The command body has not arrived.
    #[default]
    None,
    /// The command body arrived and verified against the bound digest.
    Received,
}

impl PayloadStatus {
    /// Returns true once the payload arrived and verified.
    pub fn is_received(&self) -> bool {
        matches!(self, PayloadStatus::Received)
    }
}

// ============================================================================
// Arrival Signal
// ============================================================================

/// One-shot completion signal for payload delivery.
///
/// Single producer, any number of waiters. `fire` completes the signal at
/// most once; waiters that arrive after the fire complete immediately.
/// Timeouts abandon the waiter only and never affect the signal.
#[derive(Debug, Clone, Default)]
pub struct ArrivalHandle {
    inner: Arc<ArrivalInner>,
}

#[derive(Debug, Default)]
struct ArrivalInner {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl ArrivalHandle {
    /// Creates an unfired signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Completes the signal, waking all current waiters. Idempotent.
    pub fn fire(&self) {
        let mut fired = self.inner.fired.lock().expect("lock poisoned");
        if !*fired {
            *fired = true;
            self.inner.cond.notify_all();
        }
    }

    /// Returns true if the signal has fired.
    pub fn is_fired(&self) -> bool {
        *self.inner.fired.lock().expect("lock poisoned")
    }

    /// Blocks until the signal fires or the timeout elapses.
    ///
    /// Returns true if the signal fired, false on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut fired = self.inner.fired.lock().expect("lock poisoned");
        while !*fired {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = self
                .inner
                .cond
                .wait_timeout(fired, deadline - now)
                .expect("lock poisoned");
            fired = guard;
            if result.timed_out() && !*fired {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// Log Entry
// ============================================================================

/// Per-slot record aggregating agreement state, quorum counters, and the
/// payload.
///
/// An entry is created lazily by whichever of leader allocation, agreement
/// message receipt, or payload receipt fires first for its slot, and is
/// destroyed exactly when the slot executes.
///
/// Only the prepare and commit counters exist here; the slots a
/// view-change or checkpoint extension would tick are absent until such an
/// extension needs them.
#[derive(Debug)]
pub struct LogEntry {
    /// Ballot snapshot at creation.
    pub(crate) ballot: Ballot,

    /// View snapshot at creation.
    pub(crate) view: View,

    /// Authoritative digest for this slot; bound at first sight.
    pub(crate) digest: Option<Digest>,

    /// Full client request; absent until payload delivery.
    pub(crate) request: Option<Request>,

    /// Executable command extracted from the payload.
    pub(crate) command: Option<Command>,

    /// Distinct prepare acknowledgements.
    pub(crate) prepare_acks: QuorumSet,

    /// Distinct commit acknowledgements.
    pub(crate) commit_acks: QuorumSet,

    /// Sticky prepare-phase status.
    pub(crate) prepare_status: PrepareStatus,

    /// Sticky commit-phase status.
    pub(crate) commit_status: CommitStatus,

    /// Sticky payload status.
    pub(crate) payload_status: PayloadStatus,

    /// True once all three statuses hold; gates execution.
    pub(crate) committed: bool,

    /// True on the replica that originated this slot.
    pub(crate) leader_local: bool,

    /// True once this replica has emitted its Prepare for the slot.
    pub(crate) prepare_sent: bool,

    /// Reply sender attached by the local client path, if any.
    pub(crate) reply: Option<Sender<Reply>>,

    /// One-shot payload-arrival signal.
    pub(crate) arrival: ArrivalHandle,
}

impl LogEntry {
    /// Creates a fresh entry.
    ///
    /// `quorum` is the acknowledgement threshold for both counters;
    /// `digest` may bind the slot's digest immediately (leader allocation
    /// and agreement messages know it, payload receipt verifies it).
    pub fn new(ballot: Ballot, view: View, quorum: usize, digest: Option<Digest>) -> Self {
        Self {
            ballot,
            view,
            digest,
            request: None,
            command: None,
            prepare_acks: QuorumSet::new(quorum),
            commit_acks: QuorumSet::new(quorum),
            prepare_status: PrepareStatus::None,
            commit_status: CommitStatus::None,
            payload_status: PayloadStatus::None,
            committed: false,
            leader_local: false,
            prepare_sent: false,
            reply: None,
            arrival: ArrivalHandle::new(),
        }
    }

    /// Returns the ballot snapshotted at creation.
    pub fn ballot(&self) -> Ballot {
        self.ballot
    }

    /// Returns the view snapshotted at creation.
    pub fn view(&self) -> View {
        self.view
    }

    /// Returns true on the replica that originated this slot.
    pub fn is_leader_local(&self) -> bool {
        self.leader_local
    }

    /// Returns the bound digest, if any.
    pub fn digest(&self) -> Option<Digest> {
        self.digest
    }

    /// Accepts or rejects `digest` against the entry.
    ///
    /// The first digest to reach the entry binds it; afterwards only equal
    /// digests are accepted. Returns false for a conflicting digest.
    pub fn bind_digest(&mut self, digest: Digest) -> bool {
        match self.digest {
            None => {
                self.digest = Some(digest);
                true
            }
            Some(bound) => bound == digest,
        }
    }

    /// The execution predicate: prepared, committed, and payload received.
    pub fn executable(&self) -> bool {
        self.prepare_status.is_prepared()
            && self.commit_status.is_committed()
            && self.payload_status.is_received()
    }

    /// Re-evaluates the execution predicate into the sticky `committed`
    /// flag.
    pub fn refresh_committed(&mut self) {
        if !self.committed && self.executable() {
            self.committed = true;
        }
    }

    /// Returns true once the entry is ready to execute.
    pub fn is_committed(&self) -> bool {
        self.committed
    }
}
