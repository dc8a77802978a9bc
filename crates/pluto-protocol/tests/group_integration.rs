/// Integration tests: group membership, relay and leader election.
///
/// Several overlays exchange real signed (and encrypted) datagrams over the
/// in-memory network, with a virtual clock driving heartbeats and failure
/// detection.
mod common;

use std::time::Duration;

use bytes::Bytes;
use common::Net;
use pluto_protocol::{GroupKey, ProtocolEvent, Role};
use pluto_transport::fields::{tags, TaggedFields};
use pluto_transport::MessageType;
use uuid::Uuid;

const CHAT: MessageType = MessageType::from_u128(0x6368_6174_0000_4000_8000_0000_0000_0001);

fn key() -> GroupKey {
    GroupKey::new(Uuid::new_v4(), Uuid::new_v4())
}

/// A, B and C discovered each other; A leads an announced group that B
/// and C joined.
fn three_member_group() -> (Net, GroupKey) {
    let mut net = Net::new();
    for _ in 0..3 {
        net.spawn();
    }
    net.settle();

    let key = key();
    net.create_group(0, key, "s3cret", true);
    assert!(net.join_known(1, key, "s3cret"));
    assert!(net.join_known(2, key, "s3cret"));
    (net, key)
}

fn chat(text: &'static str) -> TaggedFields {
    TaggedFields::new()
        .with(tags::TYPE, CHAT.to_bytes())
        .with(tags::DATA, text)
}

#[test]
fn announced_group_is_known_to_peers() {
    let mut net = Net::new();
    net.spawn();
    net.spawn();
    net.settle();

    let key = key();
    net.create_group(0, key, "s3cret", true);

    let known = net.nodes[1].overlay.known_groups();
    assert_eq!(known.len(), 1);
    assert_eq!(known[0].key, key);
    assert_eq!(known[0].announcers, vec![net.nodes[0].readable().to_string()]);
    assert!(net.nodes[1].events.contains(&ProtocolEvent::GroupAnnounced {
        key,
        announcer: net.identity(0),
    }));
    // The announcer does not learn about its own group.
    assert!(net.nodes[0].overlay.known_groups().is_empty());
}

#[test]
fn join_flow_builds_full_membership() {
    let (net, key) = three_member_group();
    let (a, b, c) = (&net.nodes[0], &net.nodes[1], &net.nodes[2]);

    let members = |i: usize| net.nodes[i].overlay.group(&key).unwrap().members.clone();
    assert!(members(0).contains(b.readable()) && members(0).contains(c.readable()));
    assert!(members(1).contains(a.readable()) && members(1).contains(c.readable()));
    assert!(members(2).contains(a.readable()) && members(2).contains(b.readable()));
    for i in 0..3 {
        assert_eq!(members(i).len(), 2);
    }

    assert_eq!(b.leader(&key), Some(net.identity(0)));
    assert_eq!(c.leader(&key), Some(net.identity(0)));
    assert_eq!(b.role(&key), Some(Role::Follower));
    assert!(b.events.contains(&ProtocolEvent::GroupJoined {
        key,
        leader: net.identity(0),
    }));
    // B hears about C from the leader.
    assert!(b.events.contains(&ProtocolEvent::MemberJoined {
        key,
        member: net.identity(2),
    }));
    let joined = a
        .events
        .iter()
        .filter(|e| matches!(e, ProtocolEvent::MemberJoined { .. }))
        .count();
    assert_eq!(joined, 2);
}

#[test]
fn wrong_access_key_is_refused() {
    let mut net = Net::new();
    net.spawn();
    net.spawn();
    net.settle();

    let key = key();
    net.create_group(0, key, "s3cret", true);
    // The request goes out but the leader drops it.
    assert!(net.join_known(1, key, "guess"));

    assert!(net.nodes[1].overlay.group(&key).is_none());
    assert!(net.nodes[0].overlay.group(&key).unwrap().members.is_empty());
}

#[test]
fn join_unknown_group_is_not_sent() {
    let mut net = Net::new();
    net.spawn();
    net.spawn();
    net.settle();
    assert!(!net.join_known(1, key(), "s3cret"));
}

#[test]
fn leader_is_confirmed_and_followers_stay() {
    let (mut net, key) = three_member_group();
    assert_eq!(net.nodes[0].role(&key), Some(Role::LeaderElect));

    net.advance(Duration::from_secs(5));

    assert_eq!(net.nodes[0].role(&key), Some(Role::Leader));
    assert!(net.nodes[0]
        .events
        .contains(&ProtocolEvent::LeadershipConfirmed { key }));
    for i in 1..3 {
        assert_eq!(net.nodes[i].role(&key), Some(Role::Follower));
        assert_eq!(net.nodes[i].leader(&key), Some(net.identity(0)));
        assert!(!net.nodes[i]
            .events
            .iter()
            .any(|e| matches!(e, ProtocolEvent::CampaignStarted { .. })));
    }
}

#[test]
fn leader_failure_elects_one_survivor() {
    let (mut net, key) = three_member_group();
    net.advance(Duration::from_secs(2));

    net.nodes[0].down = true;
    net.advance(Duration::from_secs(6));

    let leaders: Vec<usize> = (1..3)
        .filter(|i| net.nodes[*i].role(&key) == Some(Role::Leader))
        .collect();
    assert_eq!(leaders.len(), 1, "exactly one survivor leads");
    let winner = leaders[0];
    let follower = 3 - winner;

    assert_eq!(net.nodes[follower].role(&key), Some(Role::Follower));
    assert_eq!(net.nodes[follower].leader(&key), Some(net.identity(winner)));
    assert_eq!(net.nodes[winner].leader(&key), Some(net.identity(winner)));
    assert!(net.nodes[winner]
        .events
        .contains(&ProtocolEvent::CampaignStarted { key }));
    assert!(net.nodes[follower]
        .events
        .contains(&ProtocolEvent::LeaderChanged {
            key,
            leader: net.identity(winner),
        }));
}

#[test]
fn followers_wait_out_the_failure_timeout() {
    let (mut net, key) = three_member_group();
    net.advance(Duration::from_secs(2));

    // Step until the leader's next heartbeat reaches B, then cut it off.
    let b = net.nodes[1].address;
    let mut steps = 0;
    loop {
        net.log.clear();
        net.advance(common::STEP);
        let heartbeat = net
            .log
            .iter()
            .any(|(from, outbound)| *from == 0 && outbound.candidates.first() == Some(&b));
        if heartbeat {
            break;
        }
        steps += 1;
        assert!(steps < 200, "no heartbeat within two intervals");
    }
    net.nodes[0].down = true;

    let campaigned = |net: &Net, i: usize| {
        net.nodes[i]
            .events
            .contains(&ProtocolEvent::CampaignStarted { key })
    };

    // Timeout is 1.1 x 1000 ms, jitter only adds to it.
    net.advance(Duration::from_millis(1080));
    assert!(!campaigned(&net, 1) && !campaigned(&net, 2), "campaign before timeout");
    assert_eq!(net.nodes[1].role(&key), Some(Role::Follower));
    assert_eq!(net.nodes[2].role(&key), Some(Role::Follower));

    // Jitter stays under 10% of the timeout.
    net.advance(Duration::from_millis(150));
    assert!(campaigned(&net, 1) || campaigned(&net, 2), "no campaign after timeout");
}

#[test]
fn leader_relays_to_every_member() {
    let (mut net, key) = three_member_group();
    net.advance(Duration::from_secs(2));
    for node in &mut net.nodes {
        assert!(node.overlay.subscribe(key.interest, CHAT));
    }

    // A member's message goes through the leader to everyone, sender
    // included.
    net.send_to_group(1, key, chat("from b"));
    for (i, node) in net.nodes.iter().enumerate() {
        assert_eq!(node.delivered.len(), 1, "node {i}");
        let message = &node.delivered[0];
        assert_eq!(message.group, key);
        assert_eq!(message.msg_type, Some(CHAT));
        assert_eq!(message.fields.get(tags::DATA), Some(&Bytes::from_static(b"from b")));
    }
    // Followers receive the leader's copy.
    assert_eq!(net.nodes[2].delivered[0].from, net.identity(0));
    assert_eq!(net.nodes[0].delivered[0].from, net.identity(1));

    // The leader's own message loops back to itself once.
    net.send_to_group(0, key, chat("from a"));
    for node in &net.nodes {
        assert_eq!(node.delivered.len(), 2);
    }

    for node in &net.nodes {
        assert_eq!(node.overlay.history(&key).len(), 2);
    }
}

#[test]
fn join_through_member_is_forwarded_to_leader() {
    let (mut net, key) = three_member_group();
    let d = net.spawn();
    net.settle();

    net.join_via(d, 1, key, "s3cret");

    let group = net.nodes[d].overlay.group(&key).expect("joined");
    assert_eq!(group.leader, net.identity(0));
    assert_eq!(group.members.len(), 3);
    assert!(net.nodes[0]
        .overlay
        .group(&key)
        .unwrap()
        .members
        .contains(net.nodes[d].readable()));
    assert!(net.nodes[1]
        .overlay
        .group(&key)
        .unwrap()
        .members
        .contains(net.nodes[d].readable()));
}

#[test]
fn messages_for_other_interests_are_not_delivered() {
    let (mut net, key) = three_member_group();
    for node in &mut net.nodes {
        node.overlay.subscribe(Uuid::new_v4(), CHAT);
    }
    net.send_to_group(0, key, chat("nobody listens"));
    assert!(net.nodes.iter().all(|n| n.delivered.is_empty()));
}
