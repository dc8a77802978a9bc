/// Peer discovery over the multicast group.
///
/// `DISCOVER` is broadcast on start and every discovery interval; nodes that
/// see a new sender answer `DISCOVER_RESPONSE`. `PEERS` asks a peer for its
/// whole peer table, returned as (`oadd`, `okey`) pairs in `PEERS_RESPONSE`.
use pluto_transport::fields::{tags, TaggedFields};
use pluto_transport::{Flow, MessageType, Origin, Peer};

use crate::peers::Registration;
use crate::types::{address_pairs, push_address_pair, DISCOVER, DISCOVER_RESPONSE, PEERS, PEERS_RESPONSE};

use super::state::OverlayState;

impl OverlayState {
    /// A presence message: type plus our readable identity.
    fn presence(&self, ty: MessageType) -> TaggedFields {
        TaggedFields::new()
            .with(tags::TYPE, ty.to_bytes())
            .with(tags::PKEY, self.node.identity().to_readable())
    }

    pub(crate) fn discover(&mut self) {
        let message = self.presence(DISCOVER);
        self.send(None, &message, false);
    }

    /// Broadcast `DISCOVER` and re-announce led groups when the discovery
    /// timer is due.
    pub(crate) fn tick_discovery(&mut self) {
        let Some(due) = self.next_discovery else {
            return;
        };
        if due > self.now {
            return;
        }
        self.discover();
        self.reannounce_groups();
        self.next_discovery = Some(self.now + self.config.discovery_interval);
    }

    pub(crate) fn request_peers(&mut self) {
        let peers: Vec<Peer> = self.peers.iter().map(|(_, peer)| peer.clone()).collect();
        let message = self.presence(PEERS);
        for peer in &peers {
            self.send(Some(peer), &message, false);
        }
    }

    pub(crate) fn handle_discover(&mut self, origin: &Origin, _fields: &TaggedFields) -> Flow {
        if self.is_local(&origin.identity) {
            return Flow::Stop;
        }
        // Answer before opening the key exchange so the sender sees us as
        // new on DISCOVER_RESPONSE and can ask for our peers.
        let (peer, registration) = self.note_peer(&origin.identity, Some(origin.address));
        if registration != Registration::Known {
            let response = self.presence(DISCOVER_RESPONSE);
            self.send(Some(&peer), &response, false);
        }
        if registration == Registration::Inserted {
            self.start_dh(&peer);
        }
        Flow::Stop
    }

    pub(crate) fn handle_discover_response(&mut self, origin: &Origin, _fields: &TaggedFields) -> Flow {
        let (peer, registration) = self.get_peer(&origin.identity, Some(origin.address));
        if registration == Registration::Inserted && self.config.exchange_peers {
            let request = self.presence(PEERS);
            self.send(Some(&peer), &request, false);
        }
        Flow::Stop
    }

    pub(crate) fn handle_peers(&mut self, origin: &Origin, _fields: &TaggedFields) -> Flow {
        let (requester, _) = self.get_peer(&origin.identity, Some(origin.address));

        let mut response = TaggedFields::new().with(tags::TYPE, PEERS_RESPONSE.to_bytes());
        for (readable, peer) in self.peers.iter() {
            if readable.as_str() == requester.readable() {
                continue;
            }
            for address in peer.addresses() {
                push_address_pair(&mut response, *address, readable);
            }
        }
        self.send(Some(&requester), &response, false);
        Flow::Stop
    }

    pub(crate) fn handle_peers_response(&mut self, origin: &Origin, fields: &TaggedFields) -> Flow {
        self.get_peer(&origin.identity, Some(origin.address));
        for (address, identity) in address_pairs(fields) {
            if self.is_local(&identity) {
                continue;
            }
            self.get_peer(&identity, Some(address));
        }
        Flow::Stop
    }
}

#[cfg(test)]
mod tests {
    use super::super::{RuntimeConfig, RuntimeEffect};
    use super::super::state::Overlay;
    use crate::types::{PEERS, PEERS_RESPONSE};
    use pluto_transport::fields::{tags, TaggedFields};
    use pluto_transport::{Identity, KeyAlgorithm, MessageType, Node, NodeConfig, Outbound};
    use std::net::SocketAddr;
    use std::time::Instant;

    fn node(port: u16) -> Node {
        let identity = Identity::generate(KeyAlgorithm::Ed25519).unwrap();
        Node::new(identity, &NodeConfig::new().port(port)).unwrap()
    }

    fn overlay(port: u16, exchange_peers: bool) -> Overlay {
        let mut overlay = Overlay::new(
            node(port),
            RuntimeConfig {
                exchange_peers,
                rng_seed: Some(port as u64),
                ..RuntimeConfig::default()
            },
        );
        let address: SocketAddr = ([127, 0, 0, 1], port).into();
        overlay.attach([address], 2, Instant::now());
        overlay
    }

    fn sent(effects: Vec<RuntimeEffect>) -> Vec<Outbound> {
        effects
            .into_iter()
            .filter_map(|e| match e {
                RuntimeEffect::Send(o) => Some(o),
                _ => None,
            })
            .collect()
    }

    fn packet(sender: &Node, fields: &TaggedFields, to: SocketAddr) -> Outbound {
        let mut peer = pluto_transport::Peer::new(Identity::generate(KeyAlgorithm::Ed25519).unwrap());
        peer.add_address(to);
        sender.send_to(Some(&peer), fields, false).unwrap()
    }

    fn type_of(reader: &Node, outbound: &Outbound) -> Option<MessageType> {
        MessageType::of(&reader.open(&outbound.packet).unwrap().1)
    }

    #[test]
    fn discover_response_asks_new_peer_for_peers() {
        let now = Instant::now();
        let mut a = overlay(7001, true);
        let b = node(7002);
        let b_addr: SocketAddr = "127.0.0.1:7002".parse().unwrap();
        let response = TaggedFields::new()
            .with(tags::TYPE, crate::types::DISCOVER_RESPONSE.to_bytes())
            .with(tags::PKEY, b.identity().to_readable());

        let out = sent(a.handle_datagram(&packet(&b, &response, "127.0.0.1:7001".parse().unwrap()).packet, b_addr, now));
        let types: Vec<_> = out.iter().map(|o| type_of(&b, o)).collect();
        assert_eq!(types, vec![Some(crate::types::SHARE_DH_KEY), Some(PEERS)]);
    }

    #[test]
    fn discover_response_without_exchange() {
        let now = Instant::now();
        let mut a = overlay(7003, false);
        let b = node(7004);
        let response = TaggedFields::new()
            .with(tags::TYPE, crate::types::DISCOVER_RESPONSE.to_bytes());

        let out = sent(a.handle_datagram(
            &packet(&b, &response, "127.0.0.1:7003".parse().unwrap()).packet,
            "127.0.0.1:7004".parse().unwrap(),
            now,
        ));
        assert_eq!(out.len(), 1);
        assert_eq!(type_of(&b, &out[0]), Some(crate::types::SHARE_DH_KEY));
    }

    #[test]
    fn peers_response_lists_others_and_merges() {
        let now = Instant::now();
        let mut a = overlay(7005, false);
        let b = node(7006);
        let c = node(7007);
        let b_addr: SocketAddr = "127.0.0.1:7006".parse().unwrap();
        let c_addr: SocketAddr = "127.0.0.1:7007".parse().unwrap();
        let a_addr: SocketAddr = "127.0.0.1:7005".parse().unwrap();

        // C tells A about itself through a PEERS_RESPONSE listing B.
        let mut listing = TaggedFields::new().with(tags::TYPE, PEERS_RESPONSE.to_bytes());
        listing.add(tags::OADD, b_addr.to_string());
        listing.add(tags::OKEY, b.identity().to_readable());
        listing.add(tags::OADD, a_addr.to_string());
        listing.add(tags::OKEY, a.identity().to_readable());
        a.handle_datagram(&packet(&c, &listing, a_addr).packet, c_addr, now);
        assert_eq!(a.peers().len(), 2);
        assert!(a.peer(a.identity().readable()).is_none());

        // B asks A for peers: only C is listed.
        let request = TaggedFields::new().with(tags::TYPE, PEERS.to_bytes());
        let out = sent(a.handle_datagram(&packet(&b, &request, a_addr).packet, b_addr, now));
        let reply = out
            .iter()
            .map(|o| b.open(&o.packet).unwrap().1)
            .find(|f| MessageType::of(f) == Some(PEERS_RESPONSE))
            .unwrap();
        let listed: Vec<_> = reply.get_all(tags::OKEY).cloned().collect();
        assert_eq!(listed, vec![bytes::Bytes::from(c.identity().to_readable())]);
    }
}
