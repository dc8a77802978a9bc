//! Integration tests: two endpoints on localhost.

use std::net::Ipv4Addr;
use std::time::Duration;

use pluto_transport::fields::{tags, TaggedFields};
use pluto_transport::{
    Identity, KeyAlgorithm, MessageType, Node, NodeConfig, Outbound, Peer, UdpEndpoint,
};

const CHAT: MessageType = MessageType::from_u128(0x019214cf_55cb_7571_a417_45f895792971);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_writer(std::io::stderr)
        .try_init();
}

async fn bound_node() -> (Node, UdpEndpoint) {
    let config = NodeConfig::new()
        .interface(Ipv4Addr::LOCALHOST)
        .port(0)
        .multicast(false);
    let identity = Identity::generate(KeyAlgorithm::Ed25519).unwrap();
    let mut node = Node::new(identity, &config).unwrap();
    let endpoint = UdpEndpoint::bind(&config).await.unwrap();
    for addr in endpoint.own_addresses() {
        node.add_address(addr);
    }
    for _ in 0..endpoint.socket_count() {
        node.mark_socket_bound();
    }
    (node, endpoint)
}

/// Sign on A, verify on B.
#[tokio::test]
async fn two_nodes_exchange_payload() {
    init_tracing();

    let (node_a, endpoint_a) = bound_node().await;
    let (node_b, endpoint_b) = bound_node().await;
    assert!(node_a.is_listening());

    let payload = TaggedFields::new()
        .with(tags::TYPE, CHAT.to_bytes())
        .with(tags::DATA, "Hello from A!");
    let outbound = node_a
        .send_to(Some(&node_b.self_peer()), &payload, false)
        .unwrap();
    let used = endpoint_a.send(&outbound).await;
    assert_eq!(used, Some(endpoint_b.own_addresses()[0]));

    let (datagram, from) = tokio::time::timeout(Duration::from_secs(5), endpoint_b.recv())
        .await
        .expect("recv timed out")
        .unwrap();
    assert_eq!(from.port(), endpoint_a.local_addr().port());

    let (sender, fields) = node_b.open(&datagram).unwrap();
    assert_eq!(&sender, node_a.identity());
    assert_eq!(MessageType::of(&fields), Some(CHAT));
    assert_eq!(fields.get(tags::DATA).unwrap(), "Hello from A!");
}

/// A failing candidate is skipped in favour of the next one.
#[tokio::test]
async fn send_falls_through_candidates() {
    init_tracing();

    let (node_a, endpoint_a) = bound_node().await;
    let (_node_b, endpoint_b) = bound_node().await;

    let packet = node_a
        .send_to(None, &TaggedFields::new().with(tags::DATA, "x"), false)
        .unwrap()
        .packet;
    let outbound = Outbound {
        packet,
        // IPv6 target on an IPv4 socket fails immediately.
        candidates: vec!["[::1]:9".parse().unwrap(), endpoint_b.local_addr()],
    };
    assert_eq!(endpoint_a.send(&outbound).await, Some(endpoint_b.local_addr()));

    let (datagram, _) = tokio::time::timeout(Duration::from_secs(5), endpoint_b.recv())
        .await
        .expect("recv timed out")
        .unwrap();
    assert!(datagram.starts_with(pluto_transport::PACKET_PREFIX));
}

/// Garbage on the socket is received but never opens.
#[tokio::test]
async fn garbage_datagram_is_rejected() {
    init_tracing();

    let (node_a, endpoint_a) = bound_node().await;
    let (_node_b, endpoint_b) = bound_node().await;

    let outbound = Outbound {
        packet: pluto_transport::Bytes::from_static(b"PLUTO 0.1\nnot a record"),
        candidates: vec![endpoint_a.local_addr()],
    };
    endpoint_b.send(&outbound).await.unwrap();

    let (datagram, _) = tokio::time::timeout(Duration::from_secs(5), endpoint_a.recv())
        .await
        .expect("recv timed out")
        .unwrap();
    assert!(node_a.open(&datagram).is_none());
}

#[tokio::test]
async fn peer_with_unreachable_address_reports_none() {
    init_tracing();

    let (node_a, endpoint_a) = bound_node().await;
    let stranger = Identity::generate(KeyAlgorithm::Ed25519).unwrap().public();
    let peer = Peer::with_address(stranger, "[::1]:9".parse().unwrap());

    let outbound = node_a
        .send_to(Some(&peer), &TaggedFields::new(), false)
        .unwrap();
    assert_eq!(endpoint_a.send(&outbound).await, None);
}

/// Successive datagrams come out at their own length, large then small.
#[tokio::test]
async fn successive_datagrams_keep_their_length() {
    init_tracing();

    let (_node_a, endpoint_a) = bound_node().await;
    let (_node_b, endpoint_b) = bound_node().await;

    let large = pluto_transport::Bytes::from(vec![0xAB; 4000]);
    let small = pluto_transport::Bytes::from_static(b"tiny");
    for packet in [large.clone(), small.clone(), large.clone()] {
        let outbound = Outbound {
            packet,
            candidates: vec![endpoint_b.local_addr()],
        };
        endpoint_a.send(&outbound).await.unwrap();
    }

    for expected in [large.clone(), small, large] {
        let (datagram, from) = tokio::time::timeout(Duration::from_secs(5), endpoint_b.recv())
            .await
            .expect("recv timed out")
            .unwrap();
        assert_eq!(from.port(), endpoint_a.local_addr().port());
        assert_eq!(datagram, expected);
    }
}
