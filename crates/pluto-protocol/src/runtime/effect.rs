use pluto_transport::Outbound;

use super::{DeliveredMessage, ProtocolEvent};

/// Output of the pure overlay state.
///
/// Every `handle_*` / `tick` / local operation returns `Vec<RuntimeEffect>`;
/// the runtime loop then executes them through the transport and channels.
#[derive(Debug)]
pub enum RuntimeEffect {
    /// A framed datagram to send to the first reachable candidate.
    Send(Outbound),

    /// A protocol event for the application (peer discovered, group joined...).
    Emit(ProtocolEvent),

    /// A group message for a subscriber.
    Deliver(DeliveredMessage),
}
