/// Protocol runtime: drives an [`Overlay`] from a live event loop.
///
/// The runtime owns the transport and all overlay state. It exposes a
/// channel-based API so the application (CLI, bot, SDK) never touches raw
/// datagrams or protocol internals.
mod channel;
mod discovery;
mod effect;
mod executor;
mod groups;
mod r#loop;
mod state;
mod transport;

pub use effect::RuntimeEffect;
pub use state::{Overlay, OverlayState};
pub use transport::Transport;

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use pluto_transport::{Identity, MessageType, Node, Peer, TaggedFields};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::group::{ElectionTiming, GroupMessage, GroupSummary, KnownGroup, DEFAULT_HISTORY_CAPACITY};
use crate::types::GroupKey;
use crate::ProtocolError;

// ── Configuration ─────────────────────────────────────────────────────

/// Configuration for the protocol runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Interval between leader heartbeats.
    pub heartbeat_interval: Duration,
    /// Failure timeout as a multiple of the heartbeat interval.
    pub failure_factor: f64,
    /// Maximum random jitter as a fraction of the failure timeout.
    pub jitter_factor: f64,
    /// Interval between `DISCOVER` broadcasts and group re-announcements.
    pub discovery_interval: Duration,
    /// Ask newly discovered peers for their peer lists.
    pub exchange_peers: bool,
    /// Messages kept per group.
    pub history_capacity: usize,
    /// Seed for election jitter. `None` seeds from the OS.
    pub rng_seed: Option<u64>,
    pub command_capacity: usize,
    pub event_capacity: usize,
    pub message_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(1000),
            failure_factor: 1.1,
            jitter_factor: 0.1,
            discovery_interval: Duration::from_millis(1000),
            exchange_peers: true,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            rng_seed: None,
            command_capacity: 64,
            event_capacity: 1024,
            message_capacity: 1024,
        }
    }
}

impl RuntimeConfig {
    pub fn timing(&self) -> ElectionTiming {
        ElectionTiming::new(self.heartbeat_interval, self.failure_factor, self.jitter_factor)
    }
}

// ── Commands (app → runtime) ──────────────────────────────────────────

/// Commands the application sends to the runtime event loop.
pub enum RuntimeCommand {
    /// Create a group led by this node.
    CreateGroup {
        key: GroupKey,
        access_key: Bytes,
        announce: bool,
    },
    /// Join an announced group through its first announcer.
    JoinGroup {
        key: GroupKey,
        access_key: Bytes,
        reply: oneshot::Sender<bool>,
    },
    /// Send a payload to every member of an own group.
    SendToGroup { key: GroupKey, fields: TaggedFields },
    /// Deliver group messages of one type for an interest.
    Subscribe { interest: Uuid, msg_type: MessageType },
    /// Ask every known peer for its peer list.
    RequestPeers,
    GetGroups {
        reply: oneshot::Sender<Vec<GroupSummary>>,
    },
    GetKnownGroups {
        reply: oneshot::Sender<Vec<KnownGroup>>,
    },
    GetPeers {
        reply: oneshot::Sender<Vec<Peer>>,
    },
    GetHistory {
        key: GroupKey,
        reply: oneshot::Sender<Vec<GroupMessage>>,
    },
    /// Graceful shutdown.
    Shutdown,
}

// ── Events (runtime → app) ───────────────────────────────────────────

/// A group message for a subscriber (verified, decrypted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    pub group: GroupKey,
    /// Signer of the datagram: the leader when relayed.
    pub from: Identity,
    pub msg_type: Option<MessageType>,
    pub fields: TaggedFields,
}

/// Protocol-level events the application may want to observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// A peer was cached for the first time.
    PeerDiscovered { identity: Identity, address: SocketAddr },
    /// A Diffie-Hellman exchange with a peer completed.
    SecureChannelEstablished { identity: Identity },
    /// A group we do not belong to was announced for the first time.
    GroupAnnounced { key: GroupKey, announcer: Identity },
    /// Our join request was accepted.
    GroupJoined { key: GroupKey, leader: Identity },
    /// A member was added to one of our groups.
    MemberJoined { key: GroupKey, member: Identity },
    /// Another node's campaign was accepted.
    LeaderChanged { key: GroupKey, leader: Identity },
    /// We claimed leadership of a group.
    CampaignStarted { key: GroupKey },
    /// Our claim reached a recognition quorum.
    LeadershipConfirmed { key: GroupKey },
}

// ── RuntimeHandle (app-facing API) ───────────────────────────────────

/// Handle to communicate with a running [`ProtocolRuntime`].
///
/// Cheap to clone. All methods are channel sends.
#[derive(Clone)]
pub struct RuntimeHandle {
    cmd_tx: mpsc::Sender<RuntimeCommand>,
    identity: Identity,
}

impl RuntimeHandle {
    /// This node's public identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    async fn command(&self, command: RuntimeCommand) -> Result<(), ProtocolError> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| ProtocolError::Shutdown)
    }

    async fn query<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> RuntimeCommand,
    ) -> Result<R, ProtocolError> {
        let (tx, rx) = oneshot::channel();
        self.command(make(tx)).await?;
        rx.await.map_err(|_| ProtocolError::Shutdown)
    }

    /// Create a group led by this node, optionally announcing it.
    pub async fn create_group(
        &self,
        key: GroupKey,
        access_key: impl Into<Bytes>,
        announce: bool,
    ) -> Result<(), ProtocolError> {
        self.command(RuntimeCommand::CreateGroup {
            key,
            access_key: access_key.into(),
            announce,
        })
        .await
    }

    /// Join an announced group. `Ok(false)` if the group is unknown or no
    /// secure channel to its announcer exists yet.
    pub async fn join_group(
        &self,
        key: GroupKey,
        access_key: impl Into<Bytes>,
    ) -> Result<bool, ProtocolError> {
        let access_key = access_key.into();
        self.query(|reply| RuntimeCommand::JoinGroup {
            key,
            access_key,
            reply,
        })
        .await
    }

    pub async fn send_to_group(
        &self,
        key: GroupKey,
        fields: TaggedFields,
    ) -> Result<(), ProtocolError> {
        self.command(RuntimeCommand::SendToGroup { key, fields }).await
    }

    /// Deliver messages of `msg_type` in groups of `interest` on the
    /// message channel.
    pub async fn subscribe(
        &self,
        interest: Uuid,
        msg_type: MessageType,
    ) -> Result<(), ProtocolError> {
        self.command(RuntimeCommand::Subscribe { interest, msg_type })
            .await
    }

    pub async fn request_peers(&self) -> Result<(), ProtocolError> {
        self.command(RuntimeCommand::RequestPeers).await
    }

    pub async fn groups(&self) -> Result<Vec<GroupSummary>, ProtocolError> {
        self.query(|reply| RuntimeCommand::GetGroups { reply }).await
    }

    pub async fn known_groups(&self) -> Result<Vec<KnownGroup>, ProtocolError> {
        self.query(|reply| RuntimeCommand::GetKnownGroups { reply })
            .await
    }

    pub async fn peers(&self) -> Result<Vec<Peer>, ProtocolError> {
        self.query(|reply| RuntimeCommand::GetPeers { reply }).await
    }

    pub async fn history(&self, key: GroupKey) -> Result<Vec<GroupMessage>, ProtocolError> {
        self.query(|reply| RuntimeCommand::GetHistory { key, reply })
            .await
    }

    /// Graceful shutdown.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(RuntimeCommand::Shutdown).await;
    }
}

// ── RuntimeChannels ──────────────────────────────────────────────────

/// Channels returned to the application when the runtime starts.
pub struct RuntimeChannels {
    /// Handle to send commands to the runtime.
    pub handle: RuntimeHandle,
    /// Group messages for subscriptions.
    pub messages: mpsc::Receiver<DeliveredMessage>,
    /// Protocol-level events.
    pub events: mpsc::Receiver<ProtocolEvent>,
}

// ── ProtocolRuntime ──────────────────────────────────────────────────

/// The protocol runtime: spawn it and communicate via channels.
pub struct ProtocolRuntime;

impl ProtocolRuntime {
    /// Create and start the protocol runtime.
    ///
    /// Takes ownership of the transport and the node. Spawns the event loop
    /// as a tokio task and returns channels for the application.
    pub fn spawn<T: Transport + 'static>(
        transport: T,
        node: Node,
        config: RuntimeConfig,
    ) -> RuntimeChannels {
        let identity = node.identity().public();

        let (cmd_tx, cmd_rx) = mpsc::channel::<RuntimeCommand>(config.command_capacity.max(1));
        let (msg_tx, msg_rx) = mpsc::channel::<DeliveredMessage>(config.message_capacity.max(1));
        let (event_tx, event_rx) = mpsc::channel::<ProtocolEvent>(config.event_capacity.max(1));

        let overlay = Overlay::new(node, config);
        tokio::spawn(r#loop::runtime_loop(
            transport, overlay, cmd_rx, msg_tx, event_tx,
        ));

        RuntimeChannels {
            handle: RuntimeHandle { cmd_tx, identity },
            messages: msg_rx,
            events: event_rx,
        }
    }
}
