use std::net::SocketAddr;

use bytes::Bytes;
use pluto_transport::{Outbound, TransportError, UdpEndpoint};

/// Network side of the runtime.
///
/// In production: implemented by [`UdpEndpoint`].
/// In tests: implemented by `MockTransport` (records sends, replays inbound
/// datagrams).
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Send to the first candidate that accepts the datagram.
    async fn send(&self, outbound: &Outbound) -> Option<SocketAddr>;

    /// Next inbound datagram. [`TransportError::Shutdown`] ends the runtime.
    async fn recv(&self) -> Result<(Bytes, SocketAddr), TransportError>;

    /// Own reachable addresses, known once bound.
    fn own_addresses(&self) -> Vec<SocketAddr>;

    /// Number of bound sockets.
    fn socket_count(&self) -> usize;
}

// ── Impl for UdpEndpoint (production) ───────────────────────────────

#[async_trait::async_trait]
impl Transport for UdpEndpoint {
    async fn send(&self, outbound: &Outbound) -> Option<SocketAddr> {
        UdpEndpoint::send(self, outbound).await
    }

    async fn recv(&self) -> Result<(Bytes, SocketAddr), TransportError> {
        UdpEndpoint::recv(self).await
    }

    fn own_addresses(&self) -> Vec<SocketAddr> {
        UdpEndpoint::own_addresses(self)
    }

    fn socket_count(&self) -> usize {
        UdpEndpoint::socket_count(self)
    }
}

// ── MockTransport (tests) ───────────────────────────────────────────

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    /// Fake transport: records every send, receives what the test injects.
    #[derive(Clone)]
    pub struct MockTransport {
        sent: Arc<Mutex<Vec<Outbound>>>,
        inbox: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<(Bytes, SocketAddr)>>>,
        address: SocketAddr,
        sockets: usize,
    }

    impl MockTransport {
        /// A transport bound at `address`, plus the sender feeding its inbox.
        pub fn new(
            address: SocketAddr,
            sockets: usize,
        ) -> (Self, mpsc::UnboundedSender<(Bytes, SocketAddr)>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let transport = Self {
                sent: Arc::new(Mutex::new(Vec::new())),
                inbox: Arc::new(tokio::sync::Mutex::new(rx)),
                address,
                sockets,
            };
            (transport, tx)
        }

        pub fn sent(&self) -> Vec<Outbound> {
            self.sent.lock().unwrap().clone()
        }

        pub fn clear_sent(&self) {
            self.sent.lock().unwrap().clear();
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        async fn send(&self, outbound: &Outbound) -> Option<SocketAddr> {
            self.sent.lock().unwrap().push(outbound.clone());
            outbound.candidates.first().copied()
        }

        async fn recv(&self) -> Result<(Bytes, SocketAddr), TransportError> {
            self.inbox
                .lock()
                .await
                .recv()
                .await
                .ok_or(TransportError::Shutdown)
        }

        fn own_addresses(&self) -> Vec<SocketAddr> {
            vec![self.address]
        }

        fn socket_count(&self) -> usize {
            self.sockets
        }
    }
}
