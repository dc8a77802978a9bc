use bytes::Bytes;
use pluto_transport::fields::{tags, TaggedFields};
use pluto_transport::{Flow, Origin, Peer};
use x25519_dalek::PublicKey;

use crate::crypto::{parse_share, CURVE25519_GENERATOR, CURVE25519_PRIME};
use crate::types::SHARE_DH_KEY;

use super::effect::RuntimeEffect;
use super::state::OverlayState;
use super::ProtocolEvent;

fn share_message(public: &PublicKey) -> TaggedFields {
    TaggedFields::new()
        .with(tags::TYPE, SHARE_DH_KEY.to_bytes())
        .with(tags::PRME, Bytes::from_static(&CURVE25519_PRIME))
        .with(tags::GENE, Bytes::from_static(&CURVE25519_GENERATOR))
        .with(tags::PKEY, Bytes::copy_from_slice(public.as_bytes()))
}

impl OverlayState {
    /// Open a key exchange with a newly cached peer.
    pub(crate) fn start_dh(&mut self, peer: &Peer) {
        let public = self.channels.begin(peer.readable());
        tracing::debug!(peer = ?peer.identity, "key exchange started");
        self.send(Some(peer), &share_message(&public), false);
    }

    /// `SHARE_DH_KEY`: answer with our own public value if we have no
    /// exchange with the sender yet, then derive the channel key.
    pub(crate) fn handle_share_dh_key(&mut self, origin: &Origin, fields: &TaggedFields) -> Flow {
        let (Some(prime), Some(generator), Some(public)) = (
            fields.get(tags::PRME),
            fields.get(tags::GENE),
            fields.get(tags::PKEY),
        ) else {
            tracing::debug!(peer = ?origin.identity, "drop SHARE_DH_KEY: missing fields");
            return Flow::Stop;
        };
        let their_public = match parse_share(prime, generator, public) {
            Ok(public) => public,
            Err(e) => {
                tracing::debug!(peer = ?origin.identity, error = %e, "drop SHARE_DH_KEY");
                return Flow::Stop;
            }
        };

        let readable = origin.identity.to_readable();
        let mut reply = None;
        let responding = !self.channels.contains(&readable);
        if responding {
            let (peer, _) = self.note_peer(&origin.identity, Some(origin.address));
            let ours = self.channels.begin(&readable);
            // Framed before the key lands in the ring: the reply must travel
            // in plaintext.
            reply = self.node.send_to(Some(&peer), &share_message(&ours), false);
        }

        match self.channels.complete(&readable, &their_public) {
            Ok(()) => {
                if let Some(outbound) = reply {
                    self.push_effect(RuntimeEffect::Send(outbound));
                }
                tracing::info!(peer = ?origin.identity, "secure channel established");
                self.emit(ProtocolEvent::SecureChannelEstablished {
                    identity: origin.identity.public(),
                });
            }
            Err(e) => {
                if responding {
                    self.channels.remove(&readable);
                }
                tracing::debug!(peer = ?origin.identity, error = %e, "key exchange failed");
            }
        }
        Flow::Stop
    }
}
