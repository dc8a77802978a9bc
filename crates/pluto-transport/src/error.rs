use std::path::PathBuf;

/// A tag that is not exactly 4 bytes long.
///
/// Tags are fixed-width on the wire, so this is a programming error at the
/// call site and is never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("tag needs to be 4 bytes long, got {0}")]
pub struct BadTag(pub usize);

/// Errors raised by [`Identity`](crate::Identity) key handling.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity has no private key")]
    MissingPrivateKey,

    #[error("unsupported key type loaded: {0}")]
    UnsupportedKeyType(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("no valid key found at {}", .0.display())]
    NoKeyFound(PathBuf),

    #[error("key file i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by the Pluto transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("socket error: {0}")]
    Socket(#[source] std::io::Error),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("no candidate address accepted the datagram")]
    Unreachable,

    #[error("endpoint is shut down")]
    Shutdown,
}
