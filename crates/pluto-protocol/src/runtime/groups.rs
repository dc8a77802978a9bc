/// Group membership, leader election and group fan-out.
///
/// Joins go to the leader (members forward them); the leader announces the
/// newcomer to everyone and answers with the member list. Leadership is a
/// bully-style campaign: the last accepted `CAMPAIGN` wins, a candidate
/// leads once a majority recognized it, and followers campaign when the
/// leader's heartbeats stop.
use std::collections::BTreeSet;
use std::net::SocketAddr;

use bytes::Bytes;
use pluto_transport::fields::{tags, TaggedFields};
use pluto_transport::{Flow, Identity, MessageType, Origin, Peer};

use crate::group::{Group, GroupTimer, KnownGroup, Role};
use crate::types::{
    address_pairs, parse_address, parse_identity, push_address_pair, time_value, GroupKey,
    ACCEPT_JOIN_REQUEST, ANNOUNCE_GROUP, ANNOUNCE_MEMBER, CAMPAIGN, HEARTBEAT, JOIN_GROUP,
    RECOGNIZE,
};

use super::state::OverlayState;
use super::ProtocolEvent;

/// Group message stamped with the current time (seconds).
fn timed(key: &GroupKey, ty: MessageType) -> TaggedFields {
    key.message(ty).with(tags::TIME, time_value())
}

impl OverlayState {
    // ── Local operations ─────────────────────────────────────────────

    pub(crate) fn create_group(&mut self, key: GroupKey, access_key: Bytes, announce: bool) {
        if self.group_index(&key).is_some() {
            tracing::debug!(group = %key, "group already exists");
            return;
        }
        let group = Group::new_led(
            key,
            access_key,
            self.node.identity(),
            announce,
            self.now,
            &self.timing,
        );
        self.groups.push(group);
        self.open_history(key);
        tracing::info!(group = %key, announce, "group created");
        if announce {
            self.send(None, &key.message(ANNOUNCE_GROUP), false);
        }
    }

    /// Announce every group created with `announce` that we lead.
    pub(crate) fn reannounce_groups(&mut self) {
        let keys: Vec<GroupKey> = self
            .groups
            .iter()
            .filter(|g| g.announce && self.is_local(&g.leader))
            .map(|g| g.key)
            .collect();
        for key in keys {
            self.send(None, &key.message(ANNOUNCE_GROUP), false);
        }
    }

    pub(crate) fn join_group(
        &mut self,
        dest: &Peer,
        joining_address: Option<SocketAddr>,
        joining_identity: Option<&Identity>,
        key: &GroupKey,
        access_key: &[u8],
    ) -> bool {
        let mut request = key
            .message(JOIN_GROUP)
            .with(tags::AKEY, Bytes::copy_from_slice(access_key));
        if let Some(address) = joining_address {
            request.add(tags::OADD, address.to_string());
        }
        if let Some(identity) = joining_identity {
            request.add(tags::OKEY, identity.to_readable());
        }
        self.send(Some(dest), &request, true)
    }

    pub(crate) fn join_known_group(&mut self, key: &GroupKey, access_key: &[u8]) -> bool {
        let Some(announcer) = self
            .known_groups
            .iter()
            .find(|g| g.key == *key)
            .and_then(|g| g.announcers.first())
        else {
            tracing::debug!(group = %key, "cannot join: group not announced");
            return false;
        };
        let Some(dest) = self.peers.get(announcer).cloned() else {
            tracing::debug!(group = %key, %announcer, "cannot join: announcer not discovered");
            return false;
        };
        let sent = self.join_group(&dest, None, None, key, access_key);
        if sent {
            tracing::info!(group = %key, via = ?dest.identity, "join requested");
        }
        sent
    }

    /// Leader: forced send to every member plus a loopback copy. Member:
    /// one send to the leader, which relays it.
    pub(crate) fn send_to_group(&mut self, key: &GroupKey, mut fields: TaggedFields) {
        let Some(index) = self.group_index(key) else {
            tracing::debug!(group = %key, "send to unknown group");
            return;
        };
        key.write_to(&mut fields);
        if self.leads(index) {
            self.send_to_members(index, &fields, None);
            let own = self.node.self_peer();
            self.send(Some(&own), &fields, false);
        } else {
            let leader = self.leader_peer(index);
            self.send(Some(&leader), &fields, false);
        }
    }

    // ── Election ─────────────────────────────────────────────────────

    /// Appoint ourselves and ask every member for recognition.
    pub(crate) fn start_campaign(&mut self, index: usize) {
        let local = self.node.identity().public();
        self.groups[index].set_leader(&local, &local, self.now, &self.timing, &mut self.rng);
        let key = self.groups[index].key;
        tracing::info!(group = %key, "leader failed, campaigning");
        self.emit(ProtocolEvent::CampaignStarted { key });
        self.send_to_members(index, &timed(&key, CAMPAIGN), None);
    }

    pub(crate) fn send_heartbeats(&mut self, index: usize) {
        let key = self.groups[index].key;
        self.send_to_members(index, &timed(&key, HEARTBEAT), None);
    }

    fn confirm_if_quorum(&mut self, index: usize) -> bool {
        if !self.groups[index].confirm_leadership(self.now, &self.timing) {
            return false;
        }
        let key = self.groups[index].key;
        tracing::info!(
            group = %key,
            members = self.groups[index].members.len(),
            "leadership confirmed"
        );
        self.emit(ProtocolEvent::LeadershipConfirmed { key });
        true
    }

    /// Failure deadlines and heartbeat timers due at `now`.
    pub(crate) fn tick_groups(&mut self) {
        for index in 0..self.groups.len() {
            match self.groups[index].due(self.now) {
                Some(GroupTimer::FailureExpired) => self.start_campaign(index),
                Some(GroupTimer::HeartbeatDue) => {
                    self.confirm_if_quorum(index);
                    if self.groups[index].leadership.role() == Role::Leader {
                        self.send_heartbeats(index);
                    }
                    self.groups[index].reschedule_heartbeat(self.now, &self.timing);
                }
                None => {}
            }
        }
    }

    fn group_for(&self, fields: &TaggedFields, what: &str) -> Option<(GroupKey, usize)> {
        let Some(key) = GroupKey::from_fields(fields) else {
            tracing::debug!("drop {what}: missing group key");
            return None;
        };
        let Some(index) = self.group_index(&key) else {
            tracing::debug!(group = %key, "drop {what}: not a member");
            return None;
        };
        Some((key, index))
    }

    // ── Handlers ─────────────────────────────────────────────────────

    pub(crate) fn handle_announce_group(&mut self, origin: &Origin, fields: &TaggedFields) -> Flow {
        let Some(key) = GroupKey::from_fields(fields) else {
            tracing::debug!("drop ANNOUNCE_GROUP: missing group key");
            return Flow::Stop;
        };
        if self.is_local(&origin.identity) {
            return Flow::Stop;
        }
        let announcer = origin.identity.readable();
        match self.known_groups.iter_mut().find(|g| g.key == key) {
            Some(known) => {
                known.add_announcer(announcer);
            }
            None => {
                self.known_groups
                    .push(KnownGroup::new(key, announcer.to_string()));
                tracing::info!(group = %key, announcer = ?origin.identity, "group announced");
                self.emit(ProtocolEvent::GroupAnnounced {
                    key,
                    announcer: origin.identity.public(),
                });
            }
        }
        Flow::Stop
    }

    pub(crate) fn handle_join_group(&mut self, origin: &Origin, fields: &TaggedFields) -> Flow {
        let Some(access_key) = fields.get(tags::AKEY) else {
            tracing::debug!("drop JOIN_GROUP: missing access key");
            return Flow::Stop;
        };
        let joiner_address = match fields.get(tags::OADD) {
            Some(value) => match parse_address(value) {
                Some(address) => address,
                None => {
                    tracing::debug!("drop JOIN_GROUP: bad joiner address");
                    return Flow::Stop;
                }
            },
            None => origin.address,
        };
        let joiner = match fields.get(tags::OKEY) {
            Some(value) => match parse_identity(value) {
                Some(identity) => identity,
                None => {
                    tracing::debug!("drop JOIN_GROUP: bad joiner identity");
                    return Flow::Stop;
                }
            },
            None => origin.identity.clone(),
        };
        let Some((key, index)) = self.group_for(fields, "JOIN_GROUP") else {
            return Flow::Stop;
        };
        if self.groups[index].access_key != *access_key {
            tracing::debug!(group = %key, joiner = ?joiner, "drop JOIN_GROUP: wrong access key");
            return Flow::Stop;
        }

        if !self.leads(index) {
            let leader = self.leader_peer(index);
            let forwarded =
                self.join_group(&leader, Some(joiner_address), Some(&joiner), &key, access_key);
            tracing::debug!(group = %key, joiner = ?joiner, forwarded, "JOIN_GROUP relayed to leader");
            return Flow::Stop;
        }
        if self.is_local(&joiner) {
            return Flow::Stop;
        }

        let (peer, _) = self.get_peer(&joiner, Some(joiner_address));
        let readable = joiner.to_readable();

        let announce = key
            .message(ANNOUNCE_MEMBER)
            .with(tags::OADD, joiner_address.to_string())
            .with(tags::OKEY, readable.clone());
        self.send_to_members(index, &announce, Some(&readable));

        let group = &mut self.groups[index];
        let added = group.members.insert(readable.clone());
        group.recognize(&readable);
        if added {
            tracing::info!(group = %key, member = ?joiner, "member joined");
            self.emit(ProtocolEvent::MemberJoined {
                key,
                member: joiner.public(),
            });
        }

        let accept = self.accept_message(index, &readable);
        self.send(Some(&peer), &accept, true);
        Flow::Stop
    }

    /// `ACCEPT_JOIN_REQUEST` for `joiner`: access key plus every other
    /// member's addresses.
    fn accept_message(&self, index: usize, joiner: &str) -> TaggedFields {
        let group = &self.groups[index];
        let mut fields = group
            .key
            .message(ACCEPT_JOIN_REQUEST)
            .with(tags::AKEY, group.access_key.clone());
        for member in group.members.iter().filter(|m| m.as_str() != joiner) {
            if let Some(peer) = self.peers.get(member) {
                for address in peer.addresses() {
                    push_address_pair(&mut fields, *address, member);
                }
            }
        }
        fields
    }

    pub(crate) fn handle_accept_join_request(&mut self, origin: &Origin, fields: &TaggedFields) -> Flow {
        let (Some(key), Some(access_key)) = (GroupKey::from_fields(fields), fields.get(tags::AKEY))
        else {
            tracing::debug!("drop ACCEPT_JOIN_REQUEST: missing fields");
            return Flow::Stop;
        };
        if self.group_index(&key).is_some() {
            tracing::debug!(group = %key, "duplicate ACCEPT_JOIN_REQUEST");
            return Flow::Stop;
        }

        let mut members = BTreeSet::new();
        for (address, identity) in address_pairs(fields) {
            if self.is_local(&identity) {
                continue;
            }
            self.get_peer(&identity, Some(address));
            members.insert(identity.to_readable());
        }
        self.get_peer(&origin.identity, Some(origin.address));
        members.insert(origin.identity.to_readable());

        let group = Group::new_followed(
            key,
            access_key.clone(),
            origin.identity.clone(),
            members,
            self.now,
            &self.timing,
            &mut self.rng,
        );
        self.groups.push(group);
        self.open_history(key);
        tracing::info!(group = %key, leader = ?origin.identity, "joined group");
        self.emit(ProtocolEvent::GroupJoined {
            key,
            leader: origin.identity.public(),
        });
        Flow::Stop
    }

    pub(crate) fn handle_announce_member(&mut self, _origin: &Origin, fields: &TaggedFields) -> Flow {
        let (Some(address), Some(identity)) = (
            fields.get(tags::OADD).and_then(|v| parse_address(v)),
            fields.get(tags::OKEY).and_then(|v| parse_identity(v)),
        ) else {
            tracing::debug!("drop ANNOUNCE_MEMBER: missing member");
            return Flow::Stop;
        };
        let Some((key, index)) = self.group_for(fields, "ANNOUNCE_MEMBER") else {
            return Flow::Stop;
        };
        if self.is_local(&identity) {
            return Flow::Stop;
        }

        self.get_peer(&identity, Some(address));
        if self.groups[index].members.insert(identity.to_readable()) {
            tracing::info!(group = %key, member = ?identity, "member joined");
            self.emit(ProtocolEvent::MemberJoined {
                key,
                member: identity.public(),
            });
        }
        Flow::Stop
    }

    pub(crate) fn handle_heartbeat(&mut self, origin: &Origin, fields: &TaggedFields) -> Flow {
        let Some((key, index)) = self.group_for(fields, "HEARTBEAT") else {
            return Flow::Stop;
        };
        if !self.groups[index].register_heartbeat(&origin.identity, self.now, &self.timing, &mut self.rng) {
            tracing::debug!(group = %key, from = ?origin.identity, "heartbeat ignored");
        }
        Flow::Stop
    }

    pub(crate) fn handle_campaign(&mut self, origin: &Origin, fields: &TaggedFields) -> Flow {
        let Some((key, index)) = self.group_for(fields, "CAMPAIGN") else {
            return Flow::Stop;
        };
        if self.is_local(&origin.identity) {
            return Flow::Stop;
        }

        let changed = self.groups[index].set_leader(
            &origin.identity,
            self.node.identity(),
            self.now,
            &self.timing,
            &mut self.rng,
        );
        if changed {
            tracing::info!(group = %key, leader = ?origin.identity, "leader changed");
            self.emit(ProtocolEvent::LeaderChanged {
                key,
                leader: origin.identity.public(),
            });
        }

        let (candidate, _) = self.get_peer(&origin.identity, Some(origin.address));
        self.send(Some(&candidate), &timed(&key, RECOGNIZE), true);
        Flow::Stop
    }

    pub(crate) fn handle_recognize(&mut self, origin: &Origin, fields: &TaggedFields) -> Flow {
        let Some((key, index)) = self.group_for(fields, "RECOGNIZE") else {
            return Flow::Stop;
        };
        let recognizer = origin.identity.readable();
        if !self.groups[index].members.contains(recognizer) {
            tracing::debug!(group = %key, from = ?origin.identity, "recognition from non-member");
            return Flow::Stop;
        }
        if self.groups[index].recognize(recognizer) && self.confirm_if_quorum(index) {
            self.send_heartbeats(index);
        }
        Flow::Stop
    }
}
