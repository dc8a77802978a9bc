use pluto_protocol::RuntimeChannels;

use crate::common::ctrl_c;
use crate::events::{emit, EventMessage, EventProtocol};

/// Run a node until Ctrl+C, logging every protocol event.
pub async fn run(mut channels: RuntimeChannels) -> anyhow::Result<()> {
    eprintln!("Press Ctrl+C to stop.\n");

    let shutdown = ctrl_c();
    tokio::pin!(shutdown);

    let mut count: u64 = 0;
    loop {
        tokio::select! {
            event = channels.events.recv() => {
                let Some(event) = event else {
                    eprintln!("runtime stopped");
                    break;
                };
                count += 1;
                emit(&EventProtocol::from(&event));
            }
            message = channels.messages.recv() => {
                let Some(message) = message else { break };
                emit(&EventMessage::from(&message));
            }
            _ = &mut shutdown => break,
        }
    }

    eprintln!("\n{count} protocol events total.");
    channels.handle.shutdown().await;
    Ok(())
}
