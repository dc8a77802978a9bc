use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use pluto_transport::fields::TaggedFields;
use pluto_transport::{Flow, Identity, Listeners, MessageType, Node, Origin, Peer};
use rand::rngs::StdRng;
use rand::SeedableRng;
use uuid::Uuid;

use crate::crypto::{ChannelCipher, SecureChannels};
use crate::group::{ElectionTiming, Group, GroupHistory, GroupMessage, GroupSummary, KnownGroup};
use crate::peers::{PeerTable, Registration};
use crate::types::{self, now_ms, GroupKey, TYPE_NAMES};

use super::effect::RuntimeEffect;
use super::{DeliveredMessage, ProtocolEvent, RuntimeConfig};

/// Complete overlay state: pure logic, no async, no sockets.
///
/// Handlers mutate it and queue [`RuntimeEffect`]s, which the owning
/// [`Overlay`] hands back to the caller after each input.
pub struct OverlayState {
    pub(crate) now: Instant,
    pub(crate) config: RuntimeConfig,
    pub(crate) timing: ElectionTiming,
    pub(crate) node: Node,
    pub(crate) peers: PeerTable,
    pub(crate) channels: SecureChannels,
    pub(crate) groups: Vec<Group>,
    pub(crate) known_groups: Vec<KnownGroup>,
    pub(crate) history: HashMap<GroupKey, GroupHistory>,
    pub(crate) rng: StdRng,
    pub(crate) next_discovery: Option<Instant>,
    /// Set once the datagram being dispatched was relayed and recorded.
    group_message_seen: bool,
    effects: Vec<RuntimeEffect>,
}

impl OverlayState {
    /// The local identity.
    pub fn identity(&self) -> &Identity {
        self.node.identity()
    }

    /// Time of the input being handled.
    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn group(&self, key: &GroupKey) -> Option<&Group> {
        self.groups.iter().find(|g| g.key == *key)
    }

    /// Hand a message to the application.
    pub fn deliver(&mut self, message: DeliveredMessage) {
        self.effects.push(RuntimeEffect::Deliver(message));
    }

    pub(crate) fn is_local(&self, identity: &Identity) -> bool {
        self.node.identity() == identity
    }

    pub(crate) fn group_index(&self, key: &GroupKey) -> Option<usize> {
        self.groups.iter().position(|g| g.key == *key)
    }

    pub(crate) fn leads(&self, index: usize) -> bool {
        self.is_local(&self.groups[index].leader)
    }

    /// Frame `fields` and queue the datagram. `false` if the node refused
    /// (no address, or forced and no cipher).
    pub(crate) fn send(&mut self, dest: Option<&Peer>, fields: &TaggedFields, force: bool) -> bool {
        match self.node.send_to(dest, fields, force) {
            Some(outbound) => {
                self.effects.push(RuntimeEffect::Send(outbound));
                true
            }
            None => false,
        }
    }

    pub(crate) fn push_effect(&mut self, effect: RuntimeEffect) {
        self.effects.push(effect);
    }

    pub(crate) fn emit(&mut self, event: ProtocolEvent) {
        self.effects.push(RuntimeEffect::Emit(event));
    }

    fn take_effects(&mut self) -> Vec<RuntimeEffect> {
        std::mem::take(&mut self.effects)
    }

    /// Record a sighting of `identity` without starting a key exchange.
    ///
    /// The local identity is never cached; it resolves to the self peer.
    pub(crate) fn note_peer(
        &mut self,
        identity: &Identity,
        address: Option<SocketAddr>,
    ) -> (Peer, Registration) {
        if self.is_local(identity) {
            return (self.node.self_peer(), Registration::Known);
        }
        let (peer, registration) = self.peers.register(identity, address);
        if registration == Registration::Inserted {
            if let Some(address) = address {
                tracing::info!(peer = ?identity, %address, "peer discovered");
                self.emit(ProtocolEvent::PeerDiscovered {
                    identity: identity.public(),
                    address,
                });
            }
        }
        (peer, registration)
    }

    /// Record a sighting of `identity`; a newly cached peer gets a key
    /// exchange.
    pub(crate) fn get_peer(
        &mut self,
        identity: &Identity,
        address: Option<SocketAddr>,
    ) -> (Peer, Registration) {
        let (peer, registration) = self.note_peer(identity, address);
        if registration == Registration::Inserted {
            self.start_dh(&peer);
        }
        (peer, registration)
    }

    /// Cached record of a group's leader, or an address-less one.
    pub(crate) fn leader_peer(&self, index: usize) -> Peer {
        let leader = &self.groups[index].leader;
        self.peers
            .get(leader.readable())
            .cloned()
            .unwrap_or_else(|| Peer::new(leader.public()))
    }

    /// Force-encrypted send to every member of a group, optionally skipping
    /// one readable identity.
    pub(crate) fn send_to_members(&mut self, index: usize, fields: &TaggedFields, except: Option<&str>) {
        let targets: Vec<Peer> = self.groups[index]
            .members
            .iter()
            .filter(|member| Some(member.as_str()) != except)
            .filter_map(|member| {
                let peer = self.peers.get(member).cloned();
                if peer.is_none() {
                    tracing::debug!(%member, "member missing from peer table");
                }
                peer
            })
            .collect();
        for peer in &targets {
            self.send(Some(peer), fields, true);
        }
    }

    pub(crate) fn open_history(&mut self, key: GroupKey) {
        let capacity = self.config.history_capacity;
        self.history
            .entry(key)
            .or_insert_with(|| GroupHistory::new(capacity));
    }

    /// Append a group message to its group's history.
    pub(crate) fn record(&mut self, key: GroupKey, origin: &Origin, fields: &TaggedFields) {
        let capacity = self.config.history_capacity;
        self.history
            .entry(key)
            .or_insert_with(|| GroupHistory::new(capacity))
            .push(GroupMessage {
                author: origin.identity.to_readable(),
                msg_type: MessageType::of(fields),
                fields: fields.clone(),
                received_at: now_ms(),
            });
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.groups
            .iter()
            .map(|g| g.leadership.deadline())
            .chain(self.next_discovery)
            .min()
    }
}

/// The overlay protocol on top of a [`Node`].
///
/// A pure state machine: inputs are datagrams, timer ticks and local
/// operations, each stamped with `now`; outputs are [`RuntimeEffect`]s.
/// The runtime loop drives it against real sockets, tests drive it with a
/// virtual clock.
pub struct Overlay {
    state: OverlayState,
    listeners: Listeners<OverlayState>,
    subscriptions: HashSet<(Uuid, MessageType)>,
}

impl Overlay {
    /// Wrap `node`: name the message types, install the channel cipher and
    /// mount the protocol handlers.
    pub fn new(mut node: Node, config: RuntimeConfig) -> Self {
        for (ty, name) in TYPE_NAMES {
            node.name_type(ty, name);
        }
        let channels = SecureChannels::new();
        node.add_encryption_handler(Arc::new(ChannelCipher::new(channels.ring())));

        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut overlay = Self {
            state: OverlayState {
                now: Instant::now(),
                timing: config.timing(),
                config,
                node,
                peers: PeerTable::new(),
                channels,
                groups: Vec::new(),
                known_groups: Vec::new(),
                history: HashMap::new(),
                rng,
                next_discovery: None,
                group_message_seen: false,
                effects: Vec::new(),
            },
            listeners: Listeners::new(),
            subscriptions: HashSet::new(),
        };
        overlay.mount();
        overlay
    }

    fn mount(&mut self) {
        self.listeners.on(types::DISCOVER, OverlayState::handle_discover);
        self.listeners
            .on(types::DISCOVER_RESPONSE, OverlayState::handle_discover_response);
        self.listeners.on(types::PEERS, OverlayState::handle_peers);
        self.listeners
            .on(types::PEERS_RESPONSE, OverlayState::handle_peers_response);
        self.listeners
            .on(types::ANNOUNCE_GROUP, OverlayState::handle_announce_group);
        self.listeners.on(types::JOIN_GROUP, OverlayState::handle_join_group);
        self.listeners
            .on(types::ACCEPT_JOIN_REQUEST, OverlayState::handle_accept_join_request);
        self.listeners
            .on(types::ANNOUNCE_MEMBER, OverlayState::handle_announce_member);
        self.listeners.on(types::HEARTBEAT, OverlayState::handle_heartbeat);
        self.listeners.on(types::CAMPAIGN, OverlayState::handle_campaign);
        self.listeners.on(types::RECOGNIZE, OverlayState::handle_recognize);
        self.listeners
            .on(types::SHARE_DH_KEY, OverlayState::handle_share_dh_key);
    }

    pub fn state(&self) -> &OverlayState {
        &self.state
    }

    pub fn identity(&self) -> &Identity {
        self.state.identity()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Report bound sockets and own addresses. Starts the protocol once
    /// the node is listening.
    pub fn attach(
        &mut self,
        addresses: impl IntoIterator<Item = SocketAddr>,
        sockets: usize,
        now: Instant,
    ) -> Vec<RuntimeEffect> {
        for address in addresses {
            self.state.node.add_address(address);
        }
        let mut ready = false;
        for _ in 0..sockets {
            ready |= self.state.node.mark_socket_bound();
        }
        if ready {
            self.start(now)
        } else {
            Vec::new()
        }
    }

    /// Begin discovery: broadcast `DISCOVER` now and every discovery
    /// interval.
    pub fn start(&mut self, now: Instant) -> Vec<RuntimeEffect> {
        self.state.now = now;
        tracing::info!(identity = %self.state.identity(), "overlay started");
        self.state.discover();
        self.state.next_discovery = Some(now + self.state.config.discovery_interval);
        self.state.take_effects()
    }

    pub fn is_started(&self) -> bool {
        self.state.next_discovery.is_some()
    }

    // ── Inputs ───────────────────────────────────────────────────────

    /// Verify, decrypt and dispatch one datagram.
    pub fn handle_datagram(
        &mut self,
        datagram: &[u8],
        from: SocketAddr,
        now: Instant,
    ) -> Vec<RuntimeEffect> {
        self.state.now = now;
        self.state.group_message_seen = false;
        if let Some((sender, fields)) = self.state.node.open(datagram) {
            let origin = Origin::new(from, sender);
            if self.listeners.dispatch(&mut self.state, &origin, &fields) == Flow::Next {
                tracing::debug!(
                    msg_type = %self.state.node.describe(MessageType::of(&fields)),
                    "no handler consumed payload"
                );
            }
        }
        self.state.take_effects()
    }

    /// Run every timer due at `now`.
    pub fn tick(&mut self, now: Instant) -> Vec<RuntimeEffect> {
        self.state.now = now;
        self.state.tick_discovery();
        self.state.tick_groups();
        self.state.take_effects()
    }

    /// Earliest armed timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.state.next_deadline()
    }

    // ── Listeners ────────────────────────────────────────────────────

    /// Append a listener for one message type after the protocol handlers.
    pub fn on(
        &mut self,
        ty: MessageType,
        listener: impl FnMut(&mut OverlayState, &Origin, &TaggedFields) -> Flow + Send + 'static,
    ) {
        self.listeners.on(ty, listener);
    }

    /// Listen for group messages of `interest`, of one type or of any type.
    ///
    /// The payload must name an own group of that interest, otherwise the
    /// next listener runs. When we lead the group and the payload came from
    /// another node, it is relayed to every member before `handler` runs.
    /// Relay and history recording happen once per datagram, however many
    /// group listeners match it.
    pub fn on_group_message(
        &mut self,
        interest: Uuid,
        msg_type: Option<MessageType>,
        mut handler: impl FnMut(&mut OverlayState, &Origin, GroupKey, &TaggedFields) -> Flow
            + Send
            + 'static,
    ) {
        let listener = move |state: &mut OverlayState, origin: &Origin, fields: &TaggedFields| {
            let Some(key) = GroupKey::from_fields(fields) else {
                return Flow::Next;
            };
            if key.interest != interest {
                return Flow::Next;
            }
            let Some(index) = state.group_index(&key) else {
                return Flow::Next;
            };
            // Several listeners may match one datagram.
            if !state.group_message_seen {
                state.group_message_seen = true;
                if state.leads(index) && !state.is_local(&origin.identity) {
                    state.send_to_members(index, fields, None);
                }
                state.record(key, origin, fields);
            }
            handler(state, origin, key, fields)
        };
        match msg_type {
            Some(ty) => self.listeners.on(ty, listener),
            None => self.listeners.on_any(listener),
        }
    }

    /// Deliver group messages of `msg_type` in groups of `interest` as
    /// [`RuntimeEffect::Deliver`]. Returns `false` if already subscribed.
    pub fn subscribe(&mut self, interest: Uuid, msg_type: MessageType) -> bool {
        if !self.subscriptions.insert((interest, msg_type)) {
            return false;
        }
        self.on_group_message(interest, Some(msg_type), |state, origin, group, fields| {
            state.deliver(DeliveredMessage {
                group,
                from: origin.identity.clone(),
                msg_type: MessageType::of(fields),
                fields: fields.clone(),
            });
            Flow::Stop
        });
        true
    }

    // ── Local operations ─────────────────────────────────────────────

    /// Create a group led by this node. No-op if it already exists.
    pub fn create_group(
        &mut self,
        key: GroupKey,
        access_key: impl Into<Bytes>,
        announce: bool,
        now: Instant,
    ) -> Vec<RuntimeEffect> {
        self.state.now = now;
        self.state.create_group(key, access_key.into(), announce);
        self.state.take_effects()
    }

    /// Send `JOIN_GROUP` to `dest`, optionally on behalf of another node.
    pub fn join_group(
        &mut self,
        dest: &Peer,
        joining_address: Option<SocketAddr>,
        joining_identity: Option<&Identity>,
        key: GroupKey,
        access_key: &[u8],
        now: Instant,
    ) -> Vec<RuntimeEffect> {
        self.state.now = now;
        self.state
            .join_group(dest, joining_address, joining_identity, &key, access_key);
        self.state.take_effects()
    }

    /// Join an announced group through its first announcer. `None` if the
    /// group is unknown or the request could not be framed (no secure
    /// channel to the announcer yet).
    pub fn join_known_group(
        &mut self,
        key: GroupKey,
        access_key: &[u8],
        now: Instant,
    ) -> Option<Vec<RuntimeEffect>> {
        self.state.now = now;
        let sent = self.state.join_known_group(&key, access_key);
        let effects = self.state.take_effects();
        sent.then_some(effects)
    }

    pub fn send_to_group(
        &mut self,
        key: GroupKey,
        fields: TaggedFields,
        now: Instant,
    ) -> Vec<RuntimeEffect> {
        self.state.now = now;
        self.state.send_to_group(&key, fields);
        self.state.take_effects()
    }

    /// Send `PEERS` to every cached peer.
    pub fn request_peers(&mut self, now: Instant) -> Vec<RuntimeEffect> {
        self.state.now = now;
        self.state.request_peers();
        self.state.take_effects()
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn groups(&self) -> Vec<GroupSummary> {
        self.state.groups.iter().map(Group::summary).collect()
    }

    pub fn group(&self, key: &GroupKey) -> Option<&Group> {
        self.state.group(key)
    }

    pub fn known_groups(&self) -> &[KnownGroup] {
        &self.state.known_groups
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.state.peers.iter().map(|(_, peer)| peer.clone()).collect()
    }

    pub fn peer(&self, readable: &str) -> Option<&Peer> {
        self.state.peers.get(readable)
    }

    /// Messages received in a group, oldest first.
    pub fn history(&self, key: &GroupKey) -> Vec<GroupMessage> {
        self.state
            .history
            .get(key)
            .map(|h| h.messages().cloned().collect())
            .unwrap_or_default()
    }

    pub fn channels(&self) -> &SecureChannels {
        &self.state.channels
    }
}
