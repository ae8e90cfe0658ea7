//! The sparse slot log and its execute cursor.

use std::collections::BTreeMap;

use crate::entry::LogEntry;
use crate::types::{Ballot, Digest, SlotNumber, View};

/// Sparse mapping from slot number to log entry with an ordered execution
/// cursor.
///
/// The log is the single ownership root for entries: handlers borrow
/// entries mutably through it, and execution removes them. For every slot
/// with an entry present, the slot is at or above the cursor; executed
/// slots are deleted immediately after applying.
#[derive(Debug)]
pub struct SlotLog {
    entries: BTreeMap<SlotNumber, LogEntry>,

    /// Next slot to apply. Dense: every slot below it has been applied
    /// and deleted.
    cursor: SlotNumber,

    /// Acknowledgement threshold handed to new entries' counters.
    quorum: usize,
}

impl SlotLog {
    /// Creates an empty log whose entries count quorums at `quorum`.
    pub fn new(quorum: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            cursor: SlotNumber::ZERO,
            quorum,
        }
    }

    /// Returns the entry for `slot`, if present.
    pub fn get(&self, slot: SlotNumber) -> Option<&LogEntry> {
        self.entries.get(&slot)
    }

    /// Returns the entry for `slot` mutably, if present.
    pub fn get_mut(&mut self, slot: SlotNumber) -> Option<&mut LogEntry> {
        self.entries.get_mut(&slot)
    }

    /// Returns true if an entry exists for `slot`.
    pub fn contains(&self, slot: SlotNumber) -> bool {
        self.entries.contains_key(&slot)
    }

    /// Returns the entry for `slot`, creating it if absent.
    ///
    /// A newly created entry snapshots `ballot` and `view` and binds
    /// `digest` when one is given. An existing entry is returned as is;
    /// digest agreement is the caller's check.
    pub fn find_or_create(
        &mut self,
        slot: SlotNumber,
        ballot: Ballot,
        view: View,
        digest: Option<Digest>,
    ) -> &mut LogEntry {
        let quorum = self.quorum;
        self.entries
            .entry(slot)
            .or_insert_with(|| LogEntry::new(ballot, view, quorum, digest))
    }

    /// Removes and returns the entry for `slot`.
    pub fn remove(&mut self, slot: SlotNumber) -> Option<LogEntry> {
        self.entries.remove(&slot)
    }

    /// Returns the next slot to apply.
    pub fn cursor(&self) -> SlotNumber {
        self.cursor
    }

    /// Advances the cursor past an applied slot.
    pub fn advance_cursor(&mut self) {
        self.cursor = self.cursor.next();
    }

    /// Returns true if `slot` has already been applied.
    pub fn is_below_cursor(&self, slot: SlotNumber) -> bool {
        slot < self.cursor
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entries are live.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
