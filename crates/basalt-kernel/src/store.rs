//! The in-memory key/value store the replicated log drives.

use std::collections::BTreeMap;

use crate::command::{Command, Key, Value};

/// Deterministic key/value state machine.
///
/// The replication layer owns a `Store` per replica and applies committed
/// commands in slot order. Because `apply` is deterministic, replicas that
/// agree on the command sequence converge on identical state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Store {
    entries: BTreeMap<Key, Value>,
}

impl Store {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a command, returning the reply value.
    ///
    /// Writes reply with an empty value; reads reply with the stored value,
    /// or an empty value when the key is absent.
    pub fn apply(&mut self, command: &Command) -> Value {
        match command {
            Command::Put { key, value } => {
                self.entries.insert(*key, value.clone());
                Value::new()
            }
            Command::Get { key } => self.entries.get(key).cloned().unwrap_or_default(),
        }
    }

    /// Returns the value under `key`, if any.
    pub fn get(&self, key: Key) -> Option<&[u8]> {
        self.entries.get(&key).map(Vec::as_slice)
    }

    /// Returns the number of keys present.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no keys are present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
