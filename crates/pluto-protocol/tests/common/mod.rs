//! In-memory network for driving several overlays with a virtual clock.
//!
//! Multicast datagrams reach every running node sharing a segment with
//! the sender (the sender included); unicast datagrams reach the node bound
//! at the first candidate address.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use pluto_protocol::{
    DeliveredMessage, GroupKey, Overlay, ProtocolEvent, Role, RuntimeConfig, RuntimeEffect,
};
use pluto_transport::{Identity, KeyAlgorithm, Node, NodeConfig, Outbound, Peer};

pub const STEP: Duration = Duration::from_millis(10);

/// `RUST_LOG=pluto_protocol=debug` shows every handled message.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

pub struct SimNode {
    pub overlay: Overlay,
    pub address: SocketAddr,
    pub down: bool,
    /// Bitmask of multicast segments.
    pub segments: u8,
    pub events: Vec<ProtocolEvent>,
    pub delivered: Vec<DeliveredMessage>,
}

impl SimNode {
    pub fn readable(&self) -> &str {
        self.overlay.identity().readable()
    }

    pub fn role(&self, key: &GroupKey) -> Option<Role> {
        self.overlay.group(key).map(|g| g.leadership.role())
    }

    pub fn leader(&self, key: &GroupKey) -> Option<Identity> {
        self.overlay.group(key).map(|g| g.leader.clone())
    }
}

pub struct Net {
    pub nodes: Vec<SimNode>,
    pub now: Instant,
    /// Every datagram delivered, with its sender index.
    pub log: Vec<(usize, Outbound)>,
    multicast: SocketAddr,
    queue: VecDeque<(usize, Outbound)>,
}

fn node_config(port: u16) -> NodeConfig {
    NodeConfig::new().port(port)
}

pub fn config(seed: u64) -> RuntimeConfig {
    RuntimeConfig {
        rng_seed: Some(seed),
        ..RuntimeConfig::default()
    }
}

impl Net {
    pub fn new() -> Self {
        init_tracing();
        Self {
            nodes: Vec::new(),
            now: Instant::now(),
            log: Vec::new(),
            multicast: NodeConfig::new().multicast_target(),
            queue: VecDeque::new(),
        }
    }

    /// Start a node on every segment.
    pub fn spawn(&mut self) -> usize {
        let seed = self.nodes.len() as u64 + 1;
        self.spawn_with(config(seed), 0xff)
    }

    pub fn spawn_with(&mut self, config: RuntimeConfig, segments: u8) -> usize {
        let port = 9000 + self.nodes.len() as u16;
        let identity = Identity::generate(KeyAlgorithm::Ed25519).unwrap();
        let node_config = node_config(port);
        let node = Node::new(identity, &node_config).unwrap();
        let address = SocketAddr::from(([127, 0, 0, 1], port));

        let mut overlay = Overlay::new(node, config);
        let effects = overlay.attach([address], node_config.socket_count(), self.now);
        let index = self.nodes.len();
        self.nodes.push(SimNode {
            overlay,
            address,
            down: false,
            segments,
            events: Vec::new(),
            delivered: Vec::new(),
        });
        self.apply(index, effects);
        index
    }

    pub fn apply(&mut self, index: usize, effects: Vec<RuntimeEffect>) {
        for effect in effects {
            match effect {
                RuntimeEffect::Send(outbound) => {
                    if !self.nodes[index].down {
                        self.queue.push_back((index, outbound));
                    }
                }
                RuntimeEffect::Emit(event) => self.nodes[index].events.push(event),
                RuntimeEffect::Deliver(message) => self.nodes[index].delivered.push(message),
            }
        }
    }

    fn targets(&self, from: usize, outbound: &Outbound) -> Vec<usize> {
        let Some(first) = outbound.candidates.first() else {
            return Vec::new();
        };
        if *first == self.multicast {
            let segments = self.nodes[from].segments;
            return (0..self.nodes.len())
                .filter(|i| !self.nodes[*i].down && self.nodes[*i].segments & segments != 0)
                .collect();
        }
        (0..self.nodes.len())
            .filter(|i| !self.nodes[*i].down && self.nodes[*i].address == *first)
            .collect()
    }

    /// Deliver queued datagrams until the network is quiet.
    pub fn settle(&mut self) {
        let mut budget = 100_000;
        while let Some((from, outbound)) = self.queue.pop_front() {
            budget -= 1;
            assert!(budget > 0, "network did not settle");
            let source = self.nodes[from].address;
            for target in self.targets(from, &outbound) {
                let now = self.now;
                let effects = self.nodes[target]
                    .overlay
                    .handle_datagram(&outbound.packet, source, now);
                self.apply(target, effects);
            }
            self.log.push((from, outbound));
        }
    }

    /// Advance the clock in small steps, ticking every running node one at
    /// a time and settling after each.
    pub fn advance(&mut self, duration: Duration) {
        let end = self.now + duration;
        while self.now < end {
            self.now += STEP;
            for index in 0..self.nodes.len() {
                if self.nodes[index].down {
                    continue;
                }
                let now = self.now;
                let effects = self.nodes[index].overlay.tick(now);
                self.apply(index, effects);
                self.settle();
            }
        }
    }

    pub fn create_group(&mut self, index: usize, key: GroupKey, access_key: &str, announce: bool) {
        let now = self.now;
        let effects = self.nodes[index]
            .overlay
            .create_group(key, access_key.to_string(), announce, now);
        self.apply(index, effects);
        self.settle();
    }

    /// Join an announced group; `false` if the request could not be sent.
    pub fn join_known(&mut self, index: usize, key: GroupKey, access_key: &str) -> bool {
        let now = self.now;
        let Some(effects) = self.nodes[index]
            .overlay
            .join_known_group(key, access_key.as_bytes(), now)
        else {
            return false;
        };
        self.apply(index, effects);
        self.settle();
        true
    }

    /// Send `JOIN_GROUP` for `index` directly to node `via`.
    pub fn join_via(&mut self, index: usize, via: usize, key: GroupKey, access_key: &str) {
        let dest: Peer = self.nodes[index]
            .overlay
            .peer(self.nodes[via].readable())
            .cloned()
            .unwrap();
        let now = self.now;
        let effects = self.nodes[index].overlay.join_group(
            &dest,
            None,
            None,
            key,
            access_key.as_bytes(),
            now,
        );
        self.apply(index, effects);
        self.settle();
    }

    pub fn send_to_group(&mut self, index: usize, key: GroupKey, fields: pluto_transport::TaggedFields) {
        let now = self.now;
        let effects = self.nodes[index].overlay.send_to_group(key, fields, now);
        self.apply(index, effects);
        self.settle();
    }

    pub fn request_peers(&mut self, index: usize) {
        let now = self.now;
        let effects = self.nodes[index].overlay.request_peers(now);
        self.apply(index, effects);
        self.settle();
    }

    pub fn identity(&self, index: usize) -> Identity {
        self.nodes[index].overlay.identity().public()
    }
}
