use std::collections::HashMap;
use std::net::SocketAddr;

use pluto_transport::{Identity, Peer};

/// Outcome of registering a sighting of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Already cached; the address (if any) was merged.
    Known,
    /// First sighting with an address; now cached.
    Inserted,
    /// First sighting without an address; not cached.
    Transient,
}

/// Known peers by readable identity. One record per identity; addresses
/// only ever merge.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<String, Peer>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `identity` was seen, optionally at `address`.
    pub fn register(&mut self, identity: &Identity, address: Option<SocketAddr>) -> (Peer, Registration) {
        if let Some(peer) = self.peers.get_mut(identity.readable()) {
            if let Some(address) = address {
                peer.add_address(address);
            }
            return (peer.clone(), Registration::Known);
        }

        match address {
            Some(address) => {
                let peer = Peer::with_address(identity.public(), address);
                self.peers.insert(identity.to_readable(), peer.clone());
                (peer, Registration::Inserted)
            }
            None => (Peer::new(identity.public()), Registration::Transient),
        }
    }

    pub fn get(&self, readable: &str) -> Option<&Peer> {
        self.peers.get(readable)
    }

    pub fn contains(&self, readable: &str) -> bool {
        self.peers.contains_key(readable)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Peer)> + '_ {
        self.peers.iter()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
