/// The protocol runtime event loop.
///
/// A single async task that owns the [`Overlay`] and multiplexes over
/// inbound datagrams, application commands and the overlay's next timer.
use std::time::Instant;

use pluto_transport::TransportError;
use tokio::sync::mpsc;

use super::effect::RuntimeEffect;
use super::executor::execute_effects;
use super::state::Overlay;
use super::transport::Transport;
use super::{DeliveredMessage, ProtocolEvent, RuntimeCommand};

/// Current time on the tokio clock, so paused-time tests drive the timers.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Sleep until the overlay's next deadline, forever if none is armed.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

/// Main event loop.
pub(super) async fn runtime_loop<T: Transport>(
    transport: T,
    mut overlay: Overlay,
    mut cmd_rx: mpsc::Receiver<RuntimeCommand>,
    msg_tx: mpsc::Sender<DeliveredMessage>,
    event_tx: mpsc::Sender<ProtocolEvent>,
) {
    let effects = overlay.attach(transport.own_addresses(), transport.socket_count(), now());
    if !overlay.is_started() {
        tracing::warn!(
            sockets = transport.socket_count(),
            "transport reports fewer sockets than the node expects; discovery not started"
        );
    }
    execute_effects(effects, &transport, &msg_tx, &event_tx).await;

    loop {
        let deadline = overlay.next_deadline();
        let effects = tokio::select! {
            result = transport.recv() => match result {
                Ok((datagram, from)) => overlay.handle_datagram(&datagram, from, now()),
                Err(TransportError::Shutdown) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "receive failed");
                    continue;
                }
            },

            command = cmd_rx.recv() => match command {
                None | Some(RuntimeCommand::Shutdown) => break,
                Some(command) => handle_command(&mut overlay, command, now()),
            },

            _ = sleep_until(deadline) => overlay.tick(now()),
        };
        execute_effects(effects, &transport, &msg_tx, &event_tx).await;
    }

    tracing::info!(identity = %overlay.identity(), "runtime stopped");
}

fn handle_command(overlay: &mut Overlay, command: RuntimeCommand, now: Instant) -> Vec<RuntimeEffect> {
    match command {
        RuntimeCommand::CreateGroup {
            key,
            access_key,
            announce,
        } => overlay.create_group(key, access_key, announce, now),
        RuntimeCommand::JoinGroup {
            key,
            access_key,
            reply,
        } => {
            let effects = overlay.join_known_group(key, &access_key, now);
            let _ = reply.send(effects.is_some());
            effects.unwrap_or_default()
        }
        RuntimeCommand::SendToGroup { key, fields } => overlay.send_to_group(key, fields, now),
        RuntimeCommand::Subscribe { interest, msg_type } => {
            if !overlay.subscribe(interest, msg_type) {
                tracing::debug!(%interest, ?msg_type, "already subscribed");
            }
            Vec::new()
        }
        RuntimeCommand::RequestPeers => overlay.request_peers(now),
        RuntimeCommand::GetGroups { reply } => {
            let _ = reply.send(overlay.groups());
            Vec::new()
        }
        RuntimeCommand::GetKnownGroups { reply } => {
            let _ = reply.send(overlay.known_groups().to_vec());
            Vec::new()
        }
        RuntimeCommand::GetPeers { reply } => {
            let _ = reply.send(overlay.peers());
            Vec::new()
        }
        RuntimeCommand::GetHistory { key, reply } => {
            let _ = reply.send(overlay.history(&key));
            Vec::new()
        }
        // Handled by the loop.
        RuntimeCommand::Shutdown => Vec::new(),
    }
}
