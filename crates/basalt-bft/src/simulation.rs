//! Deterministic multi-replica simulation.
//!
//! Drives four [`Agreement`] instances through an in-memory network with
//! seeded random interleaving. Links are FIFO per (sender, receiver) pair,
//! like a TCP stream, but delivery picks a random nonempty link each step,
//! so cross-link orderings are shuffled. Faults on offer: silencing a
//! replica's outbound traffic, duplicating every delivery, and withholding
//! payload messages.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::mpsc::{channel, Receiver};

use basalt_kernel::{Command, Key};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::config::{EnsembleConfig, TimeoutConfig};
use crate::message::{DataMessage, Message, MessagePayload, Reply, Request};
use crate::replica::{Agreement, Output};
use crate::types::{Digest, ReplicaId, SlotNumber};

/// A four-replica cluster with replica 0 leading view 0.
struct Cluster {
    config: EnsembleConfig,
    replicas: Vec<Agreement>,

    /// Per-link FIFO queues. BTreeMap keeps stepping deterministic for a
    /// given seed.
    links: BTreeMap<(ReplicaId, ReplicaId), VecDeque<Message>>,

    rng: SmallRng,

    /// Replicas whose outbound messages are suppressed.
    silenced: HashSet<ReplicaId>,

    /// Enqueue every message twice.
    duplicate: bool,

    /// Divert payload messages into `held` instead of the network.
    hold_payload: bool,
    held: Vec<Message>,
}

impl Cluster {
    fn new(seed: u64) -> Self {
        let config = EnsembleConfig::four_replicas().with_timeouts(TimeoutConfig::simulation());
        let replicas = config
            .replicas()
            .map(|id| Agreement::new(id, config.clone()))
            .collect();

        Self {
            config,
            replicas,
            links: BTreeMap::new(),
            rng: SmallRng::seed_from_u64(seed),
            silenced: HashSet::new(),
            duplicate: false,
            hold_payload: false,
            held: Vec::new(),
        }
    }

    fn replica(&self, id: u8) -> &Agreement {
        &self.replicas[id as usize]
    }

    /// Submits a request to the leader, returning the client's reply
    /// receiver.
    fn submit(&mut self, request: Request) -> Receiver<Reply> {
        let (tx, rx) = channel();
        let out = self.replicas[0].admit_request(request, Some(tx));
        self.route(ReplicaId::new(0), out);
        rx
    }

    /// Enqueues a handler's output onto the network.
    fn route(&mut self, from: ReplicaId, out: Output) {
        let silenced = self.silenced.contains(&from);

        for message in out.messages {
            if silenced {
                continue;
            }
            match message.to {
                Some(to) => self.push(from, to, message),
                None => {
                    // Broadcast loops back to the sender as well.
                    for to in self.config.replicas().collect::<Vec<_>>() {
                        self.push(from, to, message.clone());
                    }
                }
            }
        }

        if let Some((slot, request)) = out.disseminate {
            let digest = Digest::of(&request.command);
            for to in self.config.others(from).collect::<Vec<_>>() {
                let data = Message::targeted(
                    from,
                    to,
                    MessagePayload::Data(DataMessage::new(from, slot, request.clone(), digest)),
                );
                if self.hold_payload {
                    self.held.push(data);
                } else if !silenced {
                    self.push(from, to, data);
                }
            }
        }
    }

    fn push(&mut self, from: ReplicaId, to: ReplicaId, message: Message) {
        let queue = self.links.entry((from, to)).or_default();
        if self.duplicate {
            queue.push_back(message.clone());
        }
        queue.push_back(message);
    }

    /// Releases withheld payload messages onto the network.
    fn release_payloads(&mut self) {
        let held = std::mem::take(&mut self.held);
        for message in held {
            let from = message.from;
            let to = message.to.expect("payload messages are targeted");
            self.push(from, to, message);
        }
    }

    /// Delivers one message from a randomly chosen nonempty link.
    fn step(&mut self) -> bool {
        let live: Vec<(ReplicaId, ReplicaId)> = self
            .links
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(link, _)| *link)
            .collect();
        if live.is_empty() {
            return false;
        }

        let link = live[self.rng.gen_range(0..live.len())];
        let message = self
            .links
            .get_mut(&link)
            .and_then(VecDeque::pop_front)
            .expect("chosen link is nonempty");

        let (_, to) = link;
        let out = self.replicas[to.as_usize()].handle(message);
        self.route(to, out);
        true
    }

    /// Runs the network dry.
    fn run(&mut self) {
        while self.step() {}
    }
}

fn put(tag: u64) -> Request {
    Request::new(Command::put(Key::new(tag), vec![tag as u8]))
}

#[test]
fn happy_path_applies_on_every_replica() {
    let mut cluster = Cluster::new(1);

    let reply_rx = cluster.submit(put(1));
    cluster.run();

    for id in 0..4 {
        let replica = cluster.replica(id);
        assert_eq!(replica.execute_cursor(), SlotNumber::new(1), "replica {id}");
        assert_eq!(replica.store().get(Key::new(1)), Some(&[1u8][..]));
        assert_eq!(replica.log_len(), 0, "entries are deleted after applying");
    }

    let reply = reply_rx.try_recv().expect("client reply");
    assert!(reply.value.is_empty());
}

#[test]
fn silent_backup_cannot_block_progress() {
    let mut cluster = Cluster::new(2);
    cluster.silenced.insert(ReplicaId::new(3));

    cluster.submit(put(1));
    cluster.run();

    // 2f+1 = 3 active replicas carry the slot to execution.
    for id in 0..3 {
        let replica = cluster.replica(id);
        assert_eq!(replica.execute_cursor(), SlotNumber::new(1), "replica {id}");
        assert_eq!(replica.store().get(Key::new(1)), Some(&[1u8][..]));
    }
}

#[test]
fn shuffled_delivery_converges_across_seeds() {
    for seed in 0..16 {
        let mut cluster = Cluster::new(seed);

        for tag in 1..=3 {
            cluster.submit(put(tag));
        }
        cluster.run();

        let reference = cluster.replica(0).store().clone();
        for id in 0..4 {
            let replica = cluster.replica(id);
            assert_eq!(
                replica.execute_cursor(),
                SlotNumber::new(3),
                "seed {seed} replica {id}"
            );
            assert_eq!(
                replica.store(),
                &reference,
                "seed {seed} replica {id} diverged"
            );
        }
    }
}

#[test]
fn duplicated_delivery_matches_single_delivery() {
    let single = {
        let mut cluster = Cluster::new(7);
        cluster.submit(put(1));
        cluster.submit(put(2));
        cluster.run();
        cluster.replica(1).store().clone()
    };

    let mut cluster = Cluster::new(7);
    cluster.duplicate = true;

    cluster.submit(put(1));
    cluster.submit(put(2));
    cluster.run();

    for id in 0..4 {
        let replica = cluster.replica(id);
        assert_eq!(replica.execute_cursor(), SlotNumber::new(2));
        assert_eq!(replica.store(), &single, "replica {id}");
    }
}

#[test]
fn delayed_payload_delays_execution_only() {
    let mut cluster = Cluster::new(3);
    cluster.hold_payload = true;

    cluster.submit(put(1));
    cluster.run();

    // The leader holds its own payload and executes; the backups agree on
    // the digest but cannot execute without the body.
    assert_eq!(cluster.replica(0).execute_cursor(), SlotNumber::new(1));
    for id in 1..4 {
        assert_eq!(
            cluster.replica(id).execute_cursor(),
            SlotNumber::ZERO,
            "replica {id} executed without its payload"
        );
    }

    // Late delivery releases them.
    cluster.hold_payload = false;
    cluster.release_payloads();
    cluster.run();

    for id in 0..4 {
        let replica = cluster.replica(id);
        assert_eq!(replica.execute_cursor(), SlotNumber::new(1), "replica {id}");
        assert_eq!(replica.store().get(Key::new(1)), Some(&[1u8][..]));
    }
}

#[test]
fn replicas_apply_slots_in_the_same_order() {
    for seed in [5u64, 11, 23] {
        let mut cluster = Cluster::new(seed);

        // All writes target one key, so the final value reveals the
        // applied order.
        for value in 1..=4u64 {
            let request = Request::new(Command::put(Key::new(9), vec![value as u8]));
            cluster.submit(request);
        }
        cluster.run();

        for id in 0..4 {
            let replica = cluster.replica(id);
            assert_eq!(replica.execute_cursor(), SlotNumber::new(4), "seed {seed}");
            assert_eq!(
                replica.store().get(Key::new(9)),
                Some(&[4u8][..]),
                "seed {seed} replica {id} applied out of order"
            );
        }
    }
}
