//! Effect executor, the only place that touches I/O.
//!
//! Takes a list of RuntimeEffect and executes them:
//! - Send -> transport.send()
//! - Deliver -> msg_tx.try_send()
//! - Emit -> event_tx.try_send()

use tokio::sync::mpsc;

use super::effect::RuntimeEffect;
use super::transport::Transport;
use super::{DeliveredMessage, ProtocolEvent};

/// Execute a list of effects using the given transport and channels.
pub(super) async fn execute_effects<T: Transport>(
    effects: Vec<RuntimeEffect>,
    transport: &T,
    msg_tx: &mpsc::Sender<DeliveredMessage>,
    event_tx: &mpsc::Sender<ProtocolEvent>,
) {
    for effect in effects {
        match effect {
            RuntimeEffect::Send(outbound) => {
                if transport.send(&outbound).await.is_none() {
                    tracing::debug!(candidates = ?outbound.candidates, "no candidate accepted datagram");
                }
            }
            RuntimeEffect::Deliver(msg) => {
                // try_send: never block the runtime on a slow consumer
                let _ = msg_tx.try_send(msg);
            }
            RuntimeEffect::Emit(event) => {
                let _ = event_tx.try_send(event);
            }
        }
    }
}
