//! Pairwise secure channels.
//!
//! Two peers agree on a 32-byte secret with an X25519 Diffie-Hellman exchange
//! carried by `SHARE_DH_KEY` messages. The exchange advertises its group in
//! the `prme`/`gene` tags (the Curve25519 field prime and base point) so that
//! a peer proposing any other group is rejected. The shared point is expanded
//! with HKDF-SHA512 and keys an XChaCha20-Poly1305 [`ChannelCipher`]
//! registered on the node.
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chacha20poly1305::aead::rand_core::OsRng;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use pluto_transport::{EncryptionHandler, Identity};
use rand::RngCore;
use sha2::Sha512;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::ProtocolError;

/// 2^255 - 19, big-endian.
pub const CURVE25519_PRIME: [u8; 32] = [
    0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xed,
];

/// Curve25519 base point u-coordinate.
pub const CURVE25519_GENERATOR: [u8; 1] = [9];

/// XChaCha20 nonce length, carried in the `encr` tag.
pub const NONCE_LEN: usize = 24;

/// Derived channel keys by readable peer identity.
///
/// Written by the protocol state as exchanges complete, read by the
/// [`ChannelCipher`] on every send and receive.
pub type KeyRing = Arc<RwLock<HashMap<String, [u8; 32]>>>;

/// Expand a DH shared point into a channel key: HKDF-SHA512, no salt, empty
/// info.
pub fn derive_channel_key(shared: &[u8; 32]) -> Result<[u8; 32], ProtocolError> {
    let hkdf = Hkdf::<Sha512>::new(None, shared);
    let mut key = [0u8; 32];
    hkdf.expand(&[], &mut key)
        .map_err(|e| ProtocolError::Crypto(format!("hkdf expand failed: {e}")))?;
    Ok(key)
}

/// Check that a `SHARE_DH_KEY` names our group and extract the peer's
/// public value.
pub fn parse_share(prime: &[u8], generator: &[u8], public: &[u8]) -> Result<PublicKey, ProtocolError> {
    if prime != CURVE25519_PRIME || generator != CURVE25519_GENERATOR {
        return Err(ProtocolError::Crypto("unsupported key exchange group".into()));
    }
    let public: [u8; 32] = public
        .try_into()
        .map_err(|_| ProtocolError::Crypto(format!("bad public value length {}", public.len())))?;
    Ok(PublicKey::from(public))
}

struct Channel {
    secret: StaticSecret,
    public: PublicKey,
    established: bool,
}

/// Per-peer key exchange state.
pub struct SecureChannels {
    channels: HashMap<String, Channel>,
    ring: KeyRing,
}

impl Default for SecureChannels {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureChannels {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
            ring: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Shared key ring for the node's [`ChannelCipher`].
    pub fn ring(&self) -> KeyRing {
        self.ring.clone()
    }

    pub fn contains(&self, peer: &str) -> bool {
        self.channels.contains_key(peer)
    }

    pub fn is_established(&self, peer: &str) -> bool {
        self.channels.get(peer).is_some_and(|c| c.established)
    }

    /// Derived key for `peer`, once the exchange completed.
    pub fn secret(&self, peer: &str) -> Option<[u8; 32]> {
        self.ring.read().ok()?.get(peer).copied()
    }

    pub fn established_count(&self) -> usize {
        self.channels.values().filter(|c| c.established).count()
    }

    /// Start an exchange with `peer`, replacing any previous state.
    /// Returns our public value to send.
    pub fn begin(&mut self, peer: &str) -> PublicKey {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        self.channels.insert(
            peer.to_string(),
            Channel {
                secret,
                public,
                established: false,
            },
        );
        if let Ok(mut ring) = self.ring.write() {
            ring.remove(peer);
        }
        public
    }

    /// Forget an exchange that failed.
    pub fn remove(&mut self, peer: &str) {
        self.channels.remove(peer);
        if let Ok(mut ring) = self.ring.write() {
            ring.remove(peer);
        }
    }

    /// Our public value for `peer`, if an exchange exists.
    pub fn public(&self, peer: &str) -> Option<PublicKey> {
        self.channels.get(peer).map(|c| c.public)
    }

    /// Complete the exchange with the peer's public value.
    pub fn complete(&mut self, peer: &str, their_public: &PublicKey) -> Result<(), ProtocolError> {
        let channel = self
            .channels
            .get_mut(peer)
            .ok_or_else(|| ProtocolError::Crypto("no key exchange in progress".into()))?;
        let shared = channel.secret.diffie_hellman(their_public);
        if !shared.was_contributory() {
            return Err(ProtocolError::Crypto("non-contributory key exchange".into()));
        }
        let key = derive_channel_key(shared.as_bytes())?;
        let mut ring = self
            .ring
            .write()
            .map_err(|_| ProtocolError::Crypto("key ring poisoned".into()))?;
        ring.insert(peer.to_string(), key);
        channel.established = true;
        Ok(())
    }
}

/// XChaCha20-Poly1305 keyed by the channel secret of each peer.
///
/// Declines peers without an established channel so forced sends abort.
pub struct ChannelCipher {
    ring: KeyRing,
}

impl ChannelCipher {
    pub fn new(ring: KeyRing) -> Self {
        Self { ring }
    }

    fn cipher_for(&self, peer: &Identity) -> Option<XChaCha20Poly1305> {
        let ring = self.ring.read().ok()?;
        let key = ring.get(peer.readable())?;
        Some(XChaCha20Poly1305::new(key.into()))
    }
}

impl EncryptionHandler for ChannelCipher {
    fn parameters(&self, _peer: &Identity) -> Vec<u8> {
        let mut nonce = vec![0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);
        nonce
    }

    fn encrypt(&self, peer: &Identity, plaintext: &[u8], parameters: &[u8]) -> Option<Vec<u8>> {
        if parameters.len() != NONCE_LEN {
            return None;
        }
        let cipher = self.cipher_for(peer)?;
        cipher.encrypt(XNonce::from_slice(parameters), plaintext).ok()
    }

    fn decrypt(&self, peer: &Identity, ciphertext: &[u8], parameters: &[u8]) -> Option<Vec<u8>> {
        if parameters.len() != NONCE_LEN {
            return None;
        }
        let cipher = self.cipher_for(peer)?;
        cipher.decrypt(XNonce::from_slice(parameters), ciphertext).ok()
    }
}
