use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Configuration for a [`Node`](crate::Node) and its
/// [`UdpEndpoint`](crate::UdpEndpoint).
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use pluto_transport::NodeConfig;
///
/// let config = NodeConfig::new()
///     .port(4000)
///     .multicast(false);
/// ```
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Interface both sockets bind on.
    pub(crate) interface: Ipv4Addr,
    /// Unicast port. 0 lets the OS pick.
    pub(crate) port: u16,
    /// Bind and join the multicast discovery socket.
    pub(crate) multicast: bool,
    /// Multicast discovery group and port.
    pub(crate) multicast_addr: SocketAddrV4,
    /// Largest datagram accepted.
    pub(crate) recv_buffer: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeConfig {
    /// Create a new config with defaults.
    ///
    /// `PLUTO_MULTICAST_ADDR` (`ip:port`) and `PLUTO_PORT` override the
    /// multicast group and the unicast port. Builder methods override both.
    pub fn new() -> Self {
        let multicast_addr = std::env::var("PLUTO_MULTICAST_ADDR")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(crate::DEFAULT_MULTICAST_ADDR);
        let port = std::env::var("PLUTO_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        Self {
            interface: Ipv4Addr::UNSPECIFIED,
            port,
            multicast: true,
            multicast_addr,
            recv_buffer: crate::DEFAULT_RECV_BUFFER,
        }
    }

    /// Set the interface to bind on (default: 0.0.0.0).
    pub fn interface(mut self, interface: Ipv4Addr) -> Self {
        self.interface = interface;
        self
    }

    /// Set the unicast port (default: OS-assigned).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enable or disable the multicast discovery socket (default: enabled).
    pub fn multicast(mut self, enabled: bool) -> Self {
        self.multicast = enabled;
        self
    }

    /// Set the multicast group and port (default: 225.0.0.1:40808).
    pub fn multicast_addr(mut self, addr: SocketAddrV4) -> Self {
        self.multicast_addr = addr;
        self
    }

    /// Set the largest accepted datagram size (default: 64 KiB).
    pub fn recv_buffer(mut self, bytes: usize) -> Self {
        self.recv_buffer = bytes;
        self
    }

    pub fn multicast_enabled(&self) -> bool {
        self.multicast
    }

    pub fn multicast_target(&self) -> SocketAddr {
        SocketAddr::V4(self.multicast_addr)
    }

    /// Number of sockets the endpoint binds under this config.
    pub fn socket_count(&self) -> usize {
        1 + usize::from(self.multicast)
    }
}
