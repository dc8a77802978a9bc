/// Integration tests: pairwise secure channels.
///
/// Discovery opens one Diffie-Hellman exchange per pair of peers; group
/// traffic between members then travels encrypted.
mod common;

use std::time::Duration;

use common::Net;
use pluto_protocol::{GroupKey, ProtocolEvent};
use pluto_transport::fields::{tags, TaggedFields};
use pluto_transport::{Identity, KeyAlgorithm, MessageType, Node, NodeConfig, PACKET_PREFIX};
use uuid::Uuid;

fn encrypted(packet: &[u8]) -> bool {
    let envelope = TaggedFields::deserialize(packet.strip_prefix(PACKET_PREFIX).unwrap());
    envelope.get(tags::ENCR).is_some_and(|encr| !encr.is_empty())
}

#[test]
fn every_pair_shares_one_secret() {
    let mut net = Net::new();
    for _ in 0..4 {
        net.spawn();
    }
    net.settle();

    for i in 0..4 {
        let node = &net.nodes[i];
        assert_eq!(node.overlay.channels().established_count(), 3);
        let established = node
            .events
            .iter()
            .filter(|e| matches!(e, ProtocolEvent::SecureChannelEstablished { .. }))
            .count();
        assert_eq!(established, 3);

        for j in (i + 1)..4 {
            let other = &net.nodes[j];
            let ours = node.overlay.channels().secret(other.readable());
            let theirs = other.overlay.channels().secret(node.readable());
            assert!(ours.is_some());
            assert_eq!(ours, theirs, "pair {i}-{j}");
        }
    }
}

#[test]
fn secrets_differ_between_pairs() {
    let mut net = Net::new();
    for _ in 0..3 {
        net.spawn();
    }
    net.settle();

    let channels = net.nodes[0].overlay.channels();
    let with_b = channels.secret(net.nodes[1].readable()).unwrap();
    let with_c = channels.secret(net.nodes[2].readable()).unwrap();
    assert_ne!(with_b, with_c);
}

#[test]
fn group_traffic_is_encrypted_and_opaque_to_outsiders() {
    let mut net = Net::new();
    for _ in 0..3 {
        net.spawn();
    }
    net.settle();

    let key = GroupKey::new(Uuid::new_v4(), Uuid::new_v4());
    net.create_group(0, key, "s3cret", true);
    assert!(net.join_known(1, key, "s3cret"));
    assert!(net.join_known(2, key, "s3cret"));
    net.advance(Duration::from_secs(2));

    let chat = MessageType::from_u128(0x6368_6174_0000_4000_8000_0000_0000_0002);
    for node in &mut net.nodes {
        node.overlay.subscribe(key.interest, chat);
    }
    net.log.clear();
    let message = TaggedFields::new()
        .with(tags::TYPE, chat.to_bytes())
        .with(tags::DATA, "private");
    net.send_to_group(1, key, message);

    // B to leader, leader to B and C.
    assert_eq!(net.log.len(), 3);
    let outsider = Node::new(
        Identity::generate(KeyAlgorithm::Ed25519).unwrap(),
        &NodeConfig::new(),
    )
    .unwrap();
    for (_, outbound) in &net.log {
        assert!(encrypted(&outbound.packet));
        assert!(outsider.open(&outbound.packet).is_none());
    }
    assert_eq!(net.nodes[2].delivered.len(), 1);
}

#[test]
fn discovery_messages_travel_in_clear() {
    let mut net = Net::new();
    net.spawn();
    net.spawn();
    net.settle();

    // Exchanges happen before any key exists.
    let first_two: Vec<bool> = net.log.iter().take(2).map(|(_, o)| encrypted(&o.packet)).collect();
    assert_eq!(first_two, vec![false, false]);
}
