//! Commands accepted by the replicated store.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Key into the replicated store.
///
/// Uses `u64` internally; clients address the keyspace directly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Key(u64);

impl Key {
    /// Creates a new key.
    pub fn new(key: u64) -> Self {
        Self(key)
    }

    /// Returns the key as a `u64`.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "k{}", self.0)
    }
}

impl From<u64> for Key {
    fn from(key: u64) -> Self {
        Self(key)
    }
}

/// Opaque value bytes stored under a key.
pub type Value = Vec<u8>;

/// A command against the replicated store.
///
/// Commands are the unit of agreement: the replication layer orders them,
/// and every replica applies them through [`Store::apply`](crate::Store::apply).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Store `value` under `key`.
    Put {
        /// Target key.
        key: Key,
        /// Value bytes to store.
        value: Value,
    },

    /// Read the value under `key`.
    Get {
        /// Target key.
        key: Key,
    },
}

impl Command {
    /// Creates a write command.
    pub fn put(key: Key, value: Value) -> Self {
        Command::Put { key, value }
    }

    /// Creates a read command.
    pub fn get(key: Key) -> Self {
        Command::Get { key }
    }

    /// Returns the key this command addresses.
    pub fn key(&self) -> Key {
        match self {
            Command::Put { key, .. } | Command::Get { key } => *key,
        }
    }

    /// Returns true if this command does not mutate the store.
    pub fn is_read(&self) -> bool {
        matches!(self, Command::Get { .. })
    }

    /// Canonical byte encoding of the command.
    ///
    /// One tag byte, the big-endian key, then the value bytes (empty for
    /// reads). Stable across replicas; content digests are computed over it.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(16);
        match self {
            Command::Put { key, value } => {
                bytes.push(0x01);
                bytes.extend_from_slice(&key.as_u64().to_be_bytes());
                bytes.extend_from_slice(value);
            }
            Command::Get { key } => {
                bytes.push(0x02);
                bytes.extend_from_slice(&key.as_u64().to_be_bytes());
            }
        }
        bytes
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Put { key, value } => write!(f, "PUT {key} ({} bytes)", value.len()),
            Command::Get { key } => write!(f, "GET {key}"),
        }
    }
}
