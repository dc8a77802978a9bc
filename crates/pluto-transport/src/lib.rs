//! Pluto transport layer.
//!
//! Signed, optionally encrypted datagrams over UDP unicast and multicast.
//! Every packet is the ASCII prefix `PLUTO 0.1\n` followed by a
//! [`TaggedFields`] envelope carrying the sender's readable identity, a
//! signature over the payload, encryption parameters and the payload itself.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use pluto_transport::{Identity, KeyAlgorithm, Node, NodeConfig, UdpEndpoint};
//! use pluto_transport::fields::{tags, TaggedFields};
//!
//! # async fn example() -> Result<(), pluto_transport::TransportError> {
//! let config = NodeConfig::new();
//! let identity = Identity::load_or_generate("id.pem", KeyAlgorithm::Ed25519)?;
//! let node = Node::new(identity, &config)?;
//! let endpoint = UdpEndpoint::bind(&config).await?;
//!
//! let hello = TaggedFields::new().with(tags::DATA, "hello");
//! if let Some(outbound) = node.send_to(None, &hello, false) {
//!     endpoint.send(&outbound).await;
//! }
//!
//! let (datagram, from) = endpoint.recv().await?;
//! if let Some((sender, fields)) = node.open(&datagram) {
//!     println!("{from} {sender}: {:?}", fields.get(tags::DATA));
//! }
//! # Ok(())
//! # }
//! ```

pub mod cipher;
mod config;
pub mod dispatch;
mod endpoint;
mod error;
pub mod fields;
pub mod identity;
mod node;

pub use cipher::EncryptionHandler;
pub use config::NodeConfig;
pub use dispatch::{Flow, Listeners};
pub use endpoint::UdpEndpoint;
pub use error::{BadTag, IdentityError, TransportError};
pub use fields::{Tag, TaggedFields};
pub use identity::{Identity, KeyAlgorithm};
pub use node::{Node, Outbound, Peer};

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

pub use bytes::Bytes;
pub use uuid::Uuid;

/// Literal prefix of every Pluto packet.
pub const PACKET_PREFIX: &[u8] = b"PLUTO 0.1\n";

/// Default multicast discovery group.
pub const DEFAULT_MULTICAST_ADDR: SocketAddrV4 =
    SocketAddrV4::new(Ipv4Addr::new(225, 0, 0, 1), 40808);

/// Default maximum datagram size accepted by the endpoint.
pub const DEFAULT_RECV_BUFFER: usize = 64 * 1024;

/// A 16-byte message type identifier, carried in the `type` tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageType(Uuid);

impl MessageType {
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Parse the raw `type` value. Anything but 16 bytes is rejected.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        Uuid::from_slice(bytes).ok().map(Self)
    }

    /// Read the `type` tag of a payload.
    pub fn of(fields: &TaggedFields) -> Option<Self> {
        fields
            .get(fields::tags::TYPE)
            .and_then(|value| Self::from_slice(value))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn to_bytes(self) -> Bytes {
        Bytes::copy_from_slice(self.0.as_bytes())
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for MessageType {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageType({})", self.0)
    }
}

/// Where a payload came from: the socket address it arrived from and the
/// identity that signed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub address: SocketAddr,
    pub identity: Identity,
}

impl Origin {
    pub fn new(address: SocketAddr, identity: Identity) -> Self {
        Self { address, identity }
    }
}
