//! Pluto overlay protocol.
//!
//! Implements peer discovery, pairwise secure channels, leader-relayed
//! groups and leader election on top of `pluto-transport` (signed UDP
//! datagrams).
//!
//! Wire format: `TaggedFields` records, message types are UUIDs.
//! Crypto: X25519 key exchange, HKDF-SHA512, XChaCha20-Poly1305.

pub mod crypto;
pub mod error;
pub mod group;
pub mod peers;
pub mod runtime;
pub mod types;

pub use crypto::{ChannelCipher, KeyRing, SecureChannels};
pub use error::ProtocolError;
pub use group::{
    has_quorum, ElectionTiming, Group, GroupHistory, GroupMessage, GroupSummary, KnownGroup,
    Leadership, Role,
};
pub use peers::{PeerTable, Registration};
pub use runtime::{
    DeliveredMessage, Overlay, OverlayState, ProtocolEvent, ProtocolRuntime, RuntimeChannels,
    RuntimeCommand, RuntimeConfig, RuntimeEffect, RuntimeHandle, Transport,
};
pub use types::{now_ms, GroupKey};
