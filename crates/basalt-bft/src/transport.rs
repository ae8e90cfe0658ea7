//! Transport abstraction for protocol message passing.
//!
//! This module defines the [`Transport`] trait the agreement core is
//! composed with, plus two in-process implementations:
//!
//! - [`Mesh`] / [`MeshTransport`]: channel-backed mesh connecting every
//!   replica in one process
//! - [`MessageSink`]: capture transport for unit tests
//!
//! # Design
//!
//! The transport is fire-and-forget: messages may be lost, reordered, or
//! duplicated, and the protocol is built to tolerate all three. Broadcasts
//! deliver to every registered replica **including the sender** — the core
//! relies on hearing its own Prepare and Commit for quorum counting.
//! Process-to-process framing lives behind this trait and is not part of
//! the core.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::error::{BftError, BftResult};
use crate::message::Message;
use crate::types::ReplicaId;

// ============================================================================
// Transport Trait
// ============================================================================

/// Abstraction for delivering protocol messages between replicas.
///
/// Implementations provide the actual delivery mechanism; the protocol
/// handles reliability through quorums and digest verification.
pub trait Transport: Debug + Send + Sync {
    /// Sends a message to a specific replica. Fire-and-forget.
    fn send(&self, to: ReplicaId, message: Message);

    /// Broadcasts a message to every replica, the sender included.
    fn broadcast(&self, message: Message);

    /// Returns the local replica ID.
    fn local_id(&self) -> ReplicaId;
}

// ============================================================================
// In-Process Mesh
// ============================================================================

/// Registry connecting [`MeshTransport`] endpoints in one process.
///
/// Each replica registers once and receives its inbox; sends look the
/// destination up in the shared registry.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    peers: Arc<Mutex<HashMap<ReplicaId, Sender<Message>>>>,
}

impl Mesh {
    /// Creates an empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a replica, returning its transport endpoint and inbox.
    ///
    /// # Errors
    ///
    /// Returns [`BftError::DuplicateMember`] if `id` is already registered.
    pub fn register(&self, id: ReplicaId) -> BftResult<(MeshTransport, Receiver<Message>)> {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut peers = self.peers.lock().expect("lock poisoned");
        if peers.contains_key(&id) {
            return Err(BftError::DuplicateMember(id));
        }
        peers.insert(id, tx);

        Ok((
            MeshTransport {
                local_id: id,
                mesh: self.clone(),
            },
            rx,
        ))
    }

    fn deliver(&self, to: ReplicaId, message: Message) {
        let peers = self.peers.lock().expect("lock poisoned");
        match peers.get(&to) {
            Some(tx) => {
                if tx.send(message).is_err() {
                    warn!(peer = %to, "peer inbox closed");
                }
            }
            None => warn!(peer = %to, "send to unregistered replica"),
        }
    }

    fn deliver_all(&self, message: Message) {
        let peers = self.peers.lock().expect("lock poisoned");
        for (to, tx) in peers.iter() {
            if tx.send(message.clone()).is_err() {
                warn!(peer = %to, "peer inbox closed");
            }
        }
    }
}

/// One replica's endpoint into a [`Mesh`].
#[derive(Debug, Clone)]
pub struct MeshTransport {
    local_id: ReplicaId,
    mesh: Mesh,
}

impl Transport for MeshTransport {
    fn send(&self, to: ReplicaId, message: Message) {
        self.mesh.deliver(to, message);
    }

    fn broadcast(&self, message: Message) {
        self.mesh.deliver_all(message);
    }

    fn local_id(&self) -> ReplicaId {
        self.local_id
    }
}

// ============================================================================
// Message Sink (for testing)
// ============================================================================

/// A transport that collects messages for inspection.
///
/// Sends record their destination; broadcasts record `None`.
#[derive(Debug)]
pub struct MessageSink {
    local_id: ReplicaId,
    messages: Mutex<Vec<(Option<ReplicaId>, Message)>>,
}

impl MessageSink {
    /// Creates a new message sink.
    pub fn new(local_id: ReplicaId) -> Self {
        Self {
            local_id,
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Returns and clears all collected messages.
    pub fn drain(&self) -> Vec<(Option<ReplicaId>, Message)> {
        let mut messages = self.messages.lock().expect("lock poisoned");
        std::mem::take(&mut *messages)
    }

    /// Returns the number of collected messages.
    pub fn len(&self) -> usize {
        self.messages.lock().expect("lock poisoned").len()
    }

    /// Returns true if no messages have been collected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Transport for MessageSink {
    fn send(&self, to: ReplicaId, message: Message) {
        let mut messages = self.messages.lock().expect("lock poisoned");
        messages.push((Some(to), message));
    }

    fn broadcast(&self, message: Message) {
        let mut messages = self.messages.lock().expect("lock poisoned");
        messages.push((None, message));
    }

    fn local_id(&self) -> ReplicaId {
        self.local_id
    }
}
