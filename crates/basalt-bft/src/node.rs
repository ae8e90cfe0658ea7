//! The replica node harness.
//!
//! A [`ReplicaNode`] wires one agreement instance to a transport:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ReplicaNode                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  dispatch thread:  inbox ─► lock(Agreement) ─► Output       │
//! │  flush:            Output.messages ─► transport             │
//! │                    Output.disseminate ─► payload channel    │
//! │  submit:           leader admits / backup registers+waits   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! All mutation of the slot log and the execute cursor happens under the
//! single agreement lock. Outbound messages are sent after the lock is
//! released; every status transition completes first, so deferred sending
//! never reorders observable state. The dispatch thread and the payload
//! workers are joined on shutdown; in-flight agreement is not rolled back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use basalt_kernel::{Key, Value};
use tracing::{debug, info, warn};

use crate::config::EnsembleConfig;
use crate::error::{BftError, BftResult};
use crate::message::{Message, Reply, Request};
use crate::payload::PayloadChannel;
use crate::replica::{Agreement, Output};
use crate::transport::Transport;
use crate::types::{ReplicaId, SlotNumber};

/// A running replica: agreement state, payload channel, and the dispatch
/// thread that drains the transport inbox.
pub struct ReplicaNode {
    replica_id: ReplicaId,
    config: EnsembleConfig,
    agreement: Arc<Mutex<Agreement>>,
    transport: Arc<dyn Transport>,
    payload: Option<PayloadChannel>,
    dispatch: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl ReplicaNode {
    /// Starts a replica over the given transport endpoint and inbox.
    ///
    /// # Errors
    ///
    /// Returns [`BftError::NotMember`] when the transport's local ID is
    /// not in the ensemble.
    pub fn start(
        config: EnsembleConfig,
        transport: Arc<dyn Transport>,
        inbox: Receiver<Message>,
    ) -> BftResult<Self> {
        let replica_id = transport.local_id();
        if !config.contains(replica_id) {
            return Err(BftError::NotMember(replica_id));
        }

        let agreement = Arc::new(Mutex::new(Agreement::new(replica_id, config.clone())));
        let payload = PayloadChannel::start(replica_id, &config, Arc::clone(&transport));
        let shutdown = Arc::new(AtomicBool::new(false));

        let dispatch = {
            let agreement = Arc::clone(&agreement);
            let transport = Arc::clone(&transport);
            let shutdown = Arc::clone(&shutdown);
            let poll_interval = config.timeouts.poll_interval;
            thread::spawn(move || {
                debug!(replica = %transport.local_id(), "dispatch loop running");
                loop {
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    match inbox.recv_timeout(poll_interval) {
                        Ok(message) => {
                            let out = agreement
                                .lock()
                                .expect("lock poisoned")
                                .handle(message);
                            flush_messages(&out, transport.as_ref());
                            // Inbound handlers never originate slots, so
                            // there is no dissemination to forward here.
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!(replica = %transport.local_id(), "dispatch loop stopped");
            })
        };

        info!(replica = %replica_id, "replica started");
        Ok(Self {
            replica_id,
            config,
            agreement,
            transport,
            payload: Some(payload),
            dispatch: Some(dispatch),
            shutdown,
        })
    }

    /// Returns this replica's ID.
    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    /// Returns true if this replica leads the current view.
    pub fn is_leader(&self) -> bool {
        self.agreement.lock().expect("lock poisoned").is_leader()
    }

    /// Returns the next slot this replica will apply.
    pub fn execute_cursor(&self) -> SlotNumber {
        self.agreement
            .lock()
            .expect("lock poisoned")
            .execute_cursor()
    }

    /// Reads a key from the local applied state.
    pub fn read(&self, key: Key) -> Option<Value> {
        self.agreement
            .lock()
            .expect("lock poisoned")
            .store()
            .get(key)
            .map(<[u8]>::to_vec)
    }

    /// Submits a client request to this replica.
    ///
    /// On the leader the request is admitted into the ordered log and its
    /// body disseminated. On a backup the request is registered against
    /// the mirrored slot; when the slot's payload has not arrived yet, the
    /// call blocks for up to the configured payload wait and abandons the
    /// invocation on expiry (the slot itself stays live for late
    /// delivery).
    ///
    /// The returned receiver yields the reply once the slot executes; a
    /// request whose slot never executes never replies.
    pub fn submit(&self, request: Request) -> Receiver<Reply> {
        let (tx, rx) = std::sync::mpsc::channel();

        let mut core = self.agreement.lock().expect("lock poisoned");
        if core.is_leader() {
            let out = core.admit_request(request, Some(tx));
            drop(core);
            self.flush(out);
        } else {
            let (slot, wait) = core.register_local(request, tx);
            drop(core);
            if let Some(arrival) = wait {
                if !arrival.wait_timeout(self.config.timeouts.payload_wait) {
                    warn!(
                        replica = %self.replica_id,
                        %slot,
                        "payload wait expired; abandoning the invocation"
                    );
                }
            }
        }

        rx
    }

    /// Sends an output's messages and dissemination directive.
    fn flush(&self, out: Output) {
        flush_messages(&out, self.transport.as_ref());
        if let Some((slot, request)) = out.disseminate {
            if let Some(payload) = &self.payload {
                payload.disseminate(slot, request);
            }
        }
    }

    /// Stops the dispatch loop, drains the payload workers, and joins
    /// both.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(dispatch) = self.dispatch.take() {
            if dispatch.join().is_err() {
                warn!(replica = %self.replica_id, "dispatch thread panicked");
            }
        }
        if let Some(payload) = self.payload.take() {
            payload.shutdown();
        }
        info!(replica = %self.replica_id, "replica stopped");
    }
}

impl Drop for ReplicaNode {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for ReplicaNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaNode")
            .field("replica_id", &self.replica_id)
            .field("ensemble", &self.config.ensemble_size())
            .finish()
    }
}

/// Sends each message through the transport, broadcast or targeted.
fn flush_messages(out: &Output, transport: &dyn Transport) {
    for message in &out.messages {
        match message.to {
            Some(to) => transport.send(to, message.clone()),
            None => transport.broadcast(message.clone()),
        }
    }
}
