//! Background dissemination of request bodies.
//!
//! Agreement messages carry only digests; the full command body travels
//! through this channel. The sender side is a bounded task set: one
//! long-lived worker per non-self peer, each fed by a bounded queue.
//! Enqueueing runs one deadline-bound attempt per peer, concurrently, so
//! the waits overlap and a dissemination call suspends for at most one
//! send deadline no matter how many peers are wedged. A peer whose queue
//! stays full past the deadline is logged and given up on. The core does
//! not retransmit; a resilience layer above would.
//!
//! The receiver side is [`Agreement::on_data`](crate::Agreement), reached
//! through normal message dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, SendTimeoutError, Sender};
use tracing::{debug, trace, warn};

use crate::config::EnsembleConfig;
use crate::message::{DataMessage, Message, MessagePayload, Request};
use crate::transport::Transport;
use crate::types::{Digest, ReplicaId, SlotNumber};

/// Depth of each per-peer delivery queue.
///
/// Deep enough to ride out transient slowness; shallow enough that a dead
/// peer exerts backpressure within one send deadline.
const QUEUE_DEPTH: usize = 128;

/// Sender side of the payload channel.
///
/// Owned by the replica node; `shutdown` disconnects the queues, lets the
/// workers drain what was already accepted, and joins them.
#[derive(Debug)]
pub struct PayloadChannel {
    local_id: ReplicaId,
    send_deadline: Duration,
    queues: HashMap<ReplicaId, Sender<DataMessage>>,
    workers: Vec<JoinHandle<()>>,
}

impl PayloadChannel {
    /// Starts one delivery worker per non-self ensemble member.
    pub fn start(
        local_id: ReplicaId,
        config: &EnsembleConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let mut queues = HashMap::new();
        let mut workers = Vec::new();

        for peer in config.others(local_id) {
            let (tx, rx) = bounded::<DataMessage>(QUEUE_DEPTH);
            queues.insert(peer, tx);

            let transport = Arc::clone(&transport);
            workers.push(thread::spawn(move || {
                while let Ok(data) = rx.recv() {
                    trace!(%peer, slot = %data.slot, "delivering payload");
                    let message =
                        Message::targeted(local_id, peer, MessagePayload::Data(data));
                    transport.send(peer, message);
                }
                debug!(%peer, "payload worker drained");
            }));
        }

        Self {
            local_id,
            send_deadline: config.timeouts.send_deadline,
            queues,
            workers,
        }
    }

    /// Disseminates a request body to every peer.
    ///
    /// Best effort: a peer whose queue does not accept the message within
    /// the send deadline is skipped with a warning. The per-peer attempts
    /// run concurrently, so the call suspends for at most one send
    /// deadline in total.
    pub fn disseminate(&self, slot: SlotNumber, request: Request) {
        let digest = Digest::of(&request.command);
        let deadline = self.send_deadline;

        thread::scope(|s| {
            for (peer, tx) in &self.queues {
                let data = DataMessage::new(self.local_id, slot, request.clone(), digest);
                s.spawn(move || match tx.send_timeout(data, deadline) {
                    Ok(()) => trace!(%peer, %slot, "payload queued"),
                    Err(SendTimeoutError::Timeout(_)) => {
                        warn!(%peer, %slot, "payload send deadline expired; giving up");
                    }
                    Err(SendTimeoutError::Disconnected(_)) => {
                        warn!(%peer, %slot, "payload worker gone");
                    }
                });
            }
        });
    }

    /// Returns the number of delivery workers.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Closes the queues, drains accepted messages, and joins the workers.
    pub fn shutdown(mut self) {
        self.queues.clear();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("payload worker panicked");
            }
        }
    }
}

impl Drop for PayloadChannel {
    fn drop(&mut self) {
        // Disconnect so workers exit even without an explicit shutdown.
        self.queues.clear();
    }
}
