use pluto_protocol::{ProtocolRuntime, RuntimeChannels, RuntimeConfig};
use pluto_transport::{Identity, Node, NodeConfig, UdpEndpoint};

use crate::events::{emit, EventStarted};

/// Socket options shared by every subcommand.
pub struct NodeOptions {
    pub port: Option<u16>,
    pub multicast: bool,
}

/// Bind the sockets and spawn the protocol runtime.
pub async fn start(identity: Identity, options: &NodeOptions) -> anyhow::Result<RuntimeChannels> {
    let mut config = NodeConfig::new().multicast(options.multicast);
    if let Some(port) = options.port {
        config = config.port(port);
    }

    let endpoint = UdpEndpoint::bind(&config).await?;
    let mut node = Node::new(identity, &config)?;
    node.on_listening(|identity, addresses| {
        eprintln!("Listening as {}", identity.short());
        for address in addresses {
            eprintln!("  {address}");
        }
        emit(&EventStarted::new(identity.readable(), addresses));
    });

    Ok(ProtocolRuntime::spawn(endpoint, node, RuntimeConfig::default()))
}

/// Resolve once Ctrl+C is received.
pub async fn ctrl_c() {
    let _ = tokio::signal::ctrl_c().await;
    eprintln!("\nCtrl+C received, shutting down...");
}
