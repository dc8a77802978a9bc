//! Pluggable payload encryption.
//!
//! Encryption handlers are registered on a [`Node`](crate::Node) in order.
//! When sending, the first handler that produces a ciphertext for the
//! destination wins and its parameters travel in the `encr` tag. When
//! receiving a packet with non-empty `encr`, handlers are tried in the same
//! order and the first successful decryption is used.

use crate::Identity;

pub trait EncryptionHandler: Send + Sync {
    /// Fresh per-message parameters for `peer` (e.g. a nonce).
    fn parameters(&self, peer: &Identity) -> Vec<u8>;

    /// Encrypt `plaintext` for `peer`. `None` when this handler cannot
    /// serve the peer.
    fn encrypt(&self, peer: &Identity, plaintext: &[u8], parameters: &[u8]) -> Option<Vec<u8>>;

    /// Decrypt `ciphertext` from `peer`. `None` when this handler cannot
    /// serve the peer or the parameters.
    fn decrypt(&self, peer: &Identity, ciphertext: &[u8], parameters: &[u8]) -> Option<Vec<u8>>;
}
