use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use crate::cipher::EncryptionHandler;
use crate::config::NodeConfig;
use crate::fields::{tags, TaggedFields};
use crate::{Identity, MessageType, TransportError, PACKET_PREFIX};

/// A remote node and the addresses it has been seen at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub identity: Identity,
    addresses: Vec<SocketAddr>,
}

impl Peer {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            addresses: Vec::new(),
        }
    }

    pub fn with_address(identity: Identity, address: SocketAddr) -> Self {
        let mut peer = Self::new(identity);
        peer.add_address(address);
        peer
    }

    /// Record an address. Returns `false` if it was already known.
    pub fn add_address(&mut self, address: SocketAddr) -> bool {
        if self.addresses.contains(&address) {
            return false;
        }
        self.addresses.push(address);
        true
    }

    /// Known addresses in the order they were learned.
    pub fn addresses(&self) -> &[SocketAddr] {
        &self.addresses
    }

    pub fn readable(&self) -> &str {
        self.identity.readable()
    }
}

/// A framed packet ready for the endpoint, with the addresses to try in
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub packet: Bytes,
    pub candidates: Vec<SocketAddr>,
}

type ListeningHook = Box<dyn FnOnce(&Identity, &[SocketAddr]) + Send>;

/// Packet framing, signatures and encryption for one local identity.
///
/// `Node` does no I/O: [`send_to`](Self::send_to) produces an [`Outbound`]
/// and [`open`](Self::open) consumes a raw datagram. The socket side lives in
/// [`UdpEndpoint`](crate::UdpEndpoint).
pub struct Node {
    identity: Identity,
    addresses: Vec<SocketAddr>,
    multicast: SocketAddr,
    type_names: HashMap<MessageType, String>,
    handlers: Vec<Arc<dyn EncryptionHandler>>,
    expected_sockets: usize,
    bound_sockets: usize,
    listening_hooks: Vec<ListeningHook>,
}

impl Node {
    /// Create a node for a local identity. The identity must hold its
    /// private key.
    pub fn new(identity: Identity, config: &NodeConfig) -> Result<Self, TransportError> {
        if !identity.has_private_key() {
            return Err(crate::IdentityError::MissingPrivateKey.into());
        }
        Ok(Self {
            identity,
            addresses: Vec::new(),
            multicast: config.multicast_target(),
            type_names: HashMap::new(),
            handlers: Vec::new(),
            expected_sockets: config.socket_count(),
            bound_sockets: 0,
            listening_hooks: Vec::new(),
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Own reachable addresses.
    pub fn addresses(&self) -> &[SocketAddr] {
        &self.addresses
    }

    pub fn add_address(&mut self, address: SocketAddr) {
        if !self.addresses.contains(&address) {
            self.addresses.push(address);
        }
    }

    /// This node as a peer record, used for loopback sends.
    pub fn self_peer(&self) -> Peer {
        Peer {
            identity: self.identity.public(),
            addresses: self.addresses.clone(),
        }
    }

    /// Register a diagnostic name for a message type.
    pub fn name_type(&mut self, ty: MessageType, name: impl Into<String>) {
        self.type_names.insert(ty, name.into());
    }

    /// Registered name for a type, or its UUID text.
    pub fn describe(&self, ty: Option<MessageType>) -> String {
        match ty {
            Some(ty) => self
                .type_names
                .get(&ty)
                .cloned()
                .unwrap_or_else(|| ty.to_string()),
            None => "<untyped>".to_string(),
        }
    }

    pub fn add_encryption_handler(&mut self, handler: Arc<dyn EncryptionHandler>) {
        self.handlers.push(handler);
    }

    /// Register a hook run once every configured socket is bound.
    pub fn on_listening(&mut self, hook: impl FnOnce(&Identity, &[SocketAddr]) + Send + 'static) {
        if self.is_listening() {
            hook(&self.identity, self.addresses.as_slice());
        } else {
            self.listening_hooks.push(Box::new(hook));
        }
    }

    pub fn is_listening(&self) -> bool {
        self.bound_sockets >= self.expected_sockets
    }

    /// Count one bound socket. Returns `true` exactly when this makes the
    /// node ready, after running the listening hooks.
    pub fn mark_socket_bound(&mut self) -> bool {
        if self.is_listening() {
            return false;
        }
        self.bound_sockets += 1;
        if !self.is_listening() {
            return false;
        }
        tracing::debug!(addresses = ?self.addresses, "node listening");
        for hook in std::mem::take(&mut self.listening_hooks) {
            hook(&self.identity, self.addresses.as_slice());
        }
        true
    }

    /// Frame `fields` for `dest`, or for the multicast group when `dest` is
    /// `None`.
    ///
    /// Returns `None` when `force` is set and no encryption handler could
    /// serve the destination, or when the destination has no address.
    pub fn send_to(&self, dest: Option<&Peer>, fields: &TaggedFields, force: bool) -> Option<Outbound> {
        let raw = fields.serialize();
        let type_name = self.describe(MessageType::of(fields));

        let Some(dest) = dest else {
            tracing::debug!(msg_type = %type_name, "multicast send");
            let packet = self.frame(raw, Bytes::new())?;
            return Some(Outbound {
                packet,
                candidates: vec![self.multicast],
            });
        };

        let mut data = raw;
        let mut parameters = Bytes::new();
        let mut encrypted = false;
        for handler in &self.handlers {
            let params = handler.parameters(&dest.identity);
            if let Some(ciphertext) = handler.encrypt(&dest.identity, &data, &params) {
                data = Bytes::from(ciphertext);
                parameters = Bytes::from(params);
                encrypted = true;
                break;
            }
        }

        if force && !encrypted {
            tracing::debug!(
                msg_type = %type_name,
                peer = ?dest.identity,
                "no encryption available, send aborted"
            );
            return None;
        }
        if dest.addresses.is_empty() {
            tracing::debug!(msg_type = %type_name, peer = ?dest.identity, "peer has no address");
            return None;
        }

        tracing::debug!(
            msg_type = %type_name,
            peer = ?dest.identity,
            encrypted,
            "send"
        );
        let packet = self.frame(data, parameters)?;
        Some(Outbound {
            packet,
            candidates: dest.addresses.clone(),
        })
    }

    fn frame(&self, data: Bytes, parameters: Bytes) -> Option<Bytes> {
        let signature = match self.identity.sign(&data) {
            Ok(signature) => signature,
            Err(e) => {
                tracing::warn!(error = %e, "cannot sign outgoing packet");
                return None;
            }
        };
        let envelope = TaggedFields::new()
            .with(tags::PKEY, self.identity.to_readable())
            .with(tags::SIGN, signature)
            .with(tags::ENCR, parameters)
            .with(tags::DATA, data)
            .serialize();

        let mut packet = BytesMut::with_capacity(PACKET_PREFIX.len() + envelope.len());
        packet.put_slice(PACKET_PREFIX);
        packet.put_slice(&envelope);
        Some(packet.freeze())
    }

    /// Verify, decrypt and decode a received datagram.
    ///
    /// Any malformed, unsigned, forged or undecryptable packet yields `None`.
    pub fn open(&self, datagram: &[u8]) -> Option<(Identity, TaggedFields)> {
        let Some(rest) = datagram.strip_prefix(PACKET_PREFIX) else {
            tracing::debug!("drop: bad packet prefix");
            return None;
        };
        let envelope = TaggedFields::deserialize(rest);
        let (Some(pkey), Some(sign), Some(encr), Some(data)) = (
            envelope.get(tags::PKEY),
            envelope.get(tags::SIGN),
            envelope.get(tags::ENCR),
            envelope.get(tags::DATA),
        ) else {
            tracing::debug!("drop: incomplete envelope");
            return None;
        };

        let sender = match std::str::from_utf8(pkey)
            .ok()
            .map(Identity::from_readable)
        {
            Some(Ok(identity)) => identity,
            _ => {
                tracing::debug!("drop: unreadable sender identity");
                return None;
            }
        };
        if !sender.verify(data, sign) {
            tracing::debug!(sender = ?sender, "drop: bad signature");
            return None;
        }

        let fields = if encr.is_empty() {
            TaggedFields::deserialize(data)
        } else {
            let plaintext = self
                .handlers
                .iter()
                .find_map(|handler| handler.decrypt(&sender, data, encr));
            match plaintext {
                Some(plaintext) => TaggedFields::deserialize(&plaintext),
                None => {
                    tracing::debug!(sender = ?sender, "drop: cannot decrypt");
                    return None;
                }
            }
        };

        tracing::debug!(
            msg_type = %self.describe(MessageType::of(&fields)),
            sender = ?sender,
            encrypted = !encr.is_empty(),
            "receive"
        );
        Some((sender, fields))
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("identity", &self.identity)
            .field("addresses", &self.addresses)
            .field("handlers", &self.handlers.len())
            .field("listening", &self.is_listening())
            .finish()
    }
}
