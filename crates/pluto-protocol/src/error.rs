/// Protocol-level errors for Pluto.
///
/// Protocol drops (unknown group, wrong access key, missing fields) are
/// never errors; they are traced and ignored. These variants cover the
/// local API surface.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("transport error: {0}")]
    Transport(#[from] pluto_transport::TransportError),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("runtime shut down")]
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_crypto() {
        let err = ProtocolError::Crypto("non-contributory key exchange".into());
        assert_eq!(err.to_string(), "crypto error: non-contributory key exchange");
    }

    #[test]
    fn test_display_shutdown() {
        assert_eq!(ProtocolError::Shutdown.to_string(), "runtime shut down");
    }

    #[test]
    fn test_transport_error_converts() {
        let err: ProtocolError = pluto_transport::TransportError::Shutdown.into();
        assert_eq!(err.to_string(), "transport error: endpoint is shut down");
    }
}
