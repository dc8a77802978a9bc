use std::io::Write;

use pluto_protocol::{now_ms, DeliveredMessage, ProtocolEvent};
use pluto_transport::fields::tags;
use serde::Serialize;

/// Emit a JSONL event to stdout (flushed immediately for piped output).
pub fn emit<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = writeln!(lock, "{json}");
        let _ = lock.flush();
    }
}

// ── Session events ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventStarted {
    pub event: &'static str,
    pub identity: String,
    pub addresses: Vec<String>,
    pub timestamp_ms: u64,
}

impl EventStarted {
    pub fn new(identity: &str, addresses: &[std::net::SocketAddr]) -> Self {
        Self {
            event: "started",
            identity: identity.to_string(),
            addresses: addresses.iter().map(ToString::to_string).collect(),
            timestamp_ms: now_ms(),
        }
    }
}

// ── Protocol events ─────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventProtocol {
    pub event: &'static str,
    /// Peer, announcer, leader or member, depending on the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub timestamp_ms: u64,
}

impl From<&ProtocolEvent> for EventProtocol {
    fn from(event: &ProtocolEvent) -> Self {
        let (name, identity, address, group) = match event {
            ProtocolEvent::PeerDiscovered { identity, address } => {
                ("peer_discovered", Some(identity), Some(address.to_string()), None)
            }
            ProtocolEvent::SecureChannelEstablished { identity } => {
                ("secure_channel", Some(identity), None, None)
            }
            ProtocolEvent::GroupAnnounced { key, announcer } => {
                ("group_announced", Some(announcer), None, Some(key))
            }
            ProtocolEvent::GroupJoined { key, leader } => ("group_joined", Some(leader), None, Some(key)),
            ProtocolEvent::MemberJoined { key, member } => ("member_joined", Some(member), None, Some(key)),
            ProtocolEvent::LeaderChanged { key, leader } => ("leader_changed", Some(leader), None, Some(key)),
            ProtocolEvent::CampaignStarted { key } => ("campaign_started", None, None, Some(key)),
            ProtocolEvent::LeadershipConfirmed { key } => ("leadership_confirmed", None, None, Some(key)),
        };
        Self {
            event: name,
            identity: identity.map(ToString::to_string),
            address,
            group: group.map(ToString::to_string),
            timestamp_ms: now_ms(),
        }
    }
}

// ── Group messages ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventMessage {
    pub event: &'static str,
    pub group: String,
    pub from: String,
    /// `data` tag as UTF-8, lossy.
    pub text: String,
    pub timestamp_ms: u64,
}

impl From<&DeliveredMessage> for EventMessage {
    fn from(message: &DeliveredMessage) -> Self {
        let text = message
            .fields
            .get(tags::DATA)
            .map(|data| String::from_utf8_lossy(data).into_owned())
            .unwrap_or_default();
        Self {
            event: "message",
            group: message.group.to_string(),
            from: message.from.to_string(),
            text,
            timestamp_ms: now_ms(),
        }
    }
}
