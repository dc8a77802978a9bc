use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::config::NodeConfig;
use crate::node::Outbound;
use crate::TransportError;

/// The UDP sockets of a node: one unicast socket and, when enabled, one
/// socket joined to the multicast discovery group.
#[derive(Debug)]
pub struct UdpEndpoint {
    unicast: UdpSocket,
    multicast: Option<UdpSocket>,
    local_addr: SocketAddr,
    /// Receive scratch space, `recv_buffer` bytes, shared by both sockets.
    scratch: Mutex<Vec<u8>>,
}

impl UdpEndpoint {
    /// Bind the sockets described by `config`.
    pub async fn bind(config: &NodeConfig) -> Result<Self, TransportError> {
        let addr = SocketAddr::V4(SocketAddrV4::new(config.interface, config.port));
        let unicast = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = unicast.local_addr().map_err(TransportError::Socket)?;
        unicast
            .set_multicast_loop_v4(true)
            .map_err(TransportError::Socket)?;

        let multicast = if config.multicast {
            Some(bind_multicast(config.interface, config.multicast_addr)?)
        } else {
            None
        };

        tracing::info!(
            %local_addr,
            multicast = ?config.multicast.then_some(config.multicast_addr),
            "endpoint bound"
        );
        Ok(Self {
            unicast,
            multicast,
            local_addr,
            scratch: Mutex::new(vec![0u8; config.recv_buffer]),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Addresses other nodes on this host can reach us at.
    pub fn own_addresses(&self) -> Vec<SocketAddr> {
        let port = self.local_addr.port();
        let mut addresses = vec![SocketAddr::from((Ipv4Addr::LOCALHOST, port))];
        let ip = self.local_addr.ip();
        if !ip.is_unspecified() && !ip.is_loopback() {
            addresses.push(self.local_addr);
        }
        addresses
    }

    /// Number of bound sockets.
    pub fn socket_count(&self) -> usize {
        1 + usize::from(self.multicast.is_some())
    }

    /// Receive the next datagram from either socket.
    ///
    /// Datagrams land in one reused buffer; only the received bytes are
    /// copied out.
    pub async fn recv(&self) -> Result<(Bytes, SocketAddr), TransportError> {
        let mut scratch = self.scratch.lock().await;
        loop {
            let socket = tokio::select! {
                res = self.unicast.readable() => {
                    res.map_err(TransportError::Socket)?;
                    &self.unicast
                }
                res = readable_optional(self.multicast.as_ref()) => {
                    res.map_err(TransportError::Socket)?
                }
            };
            match socket.try_recv_from(&mut scratch[..]) {
                Ok((len, from)) => return Ok((Bytes::copy_from_slice(&scratch[..len]), from)),
                // Spurious readiness.
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(TransportError::Socket(e)),
            }
        }
    }

    /// Send to the first candidate address that accepts the datagram.
    ///
    /// Returns the address used, or `None` if every candidate failed.
    pub async fn send(&self, outbound: &Outbound) -> Option<SocketAddr> {
        for candidate in &outbound.candidates {
            match self.unicast.send_to(&outbound.packet, candidate).await {
                Ok(_) => return Some(*candidate),
                Err(e) => {
                    tracing::debug!(%candidate, error = %e, "send failed, trying next address");
                }
            }
        }
        None
    }
}

async fn readable_optional(socket: Option<&UdpSocket>) -> std::io::Result<&UdpSocket> {
    match socket {
        Some(socket) => socket.readable().await.map(|()| socket),
        None => std::future::pending().await,
    }
}

fn bind_multicast(interface: Ipv4Addr, group: SocketAddrV4) -> Result<UdpSocket, TransportError> {
    let addr = SocketAddr::V4(SocketAddrV4::new(interface, group.port()));
    let bind_err = move |source| TransportError::Bind { addr, source };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket
        .join_multicast_v4(group.ip(), &interface)
        .map_err(bind_err)?;
    socket.set_multicast_loop_v4(true).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;

    UdpSocket::from_std(socket.into()).map_err(TransportError::Socket)
}
