use std::fmt;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use pluto_transport::fields::{tags, TaggedFields};
use pluto_transport::{Identity, MessageType};
use uuid::Uuid;

// ── Message types ─────────────────────────────────────────────────────

pub const DISCOVER: MessageType = MessageType::from_u128(0x0191cff5_1f42_7dba_9a18_32570fe5d8f9);
pub const DISCOVER_RESPONSE: MessageType =
    MessageType::from_u128(0x0191cff5_1f42_7c17_98d7_8e170189fa3c);
pub const PEERS: MessageType = MessageType::from_u128(0x0191cff5_1f42_7ef9_bc15_c3cf0ee2f2be);
pub const PEERS_RESPONSE: MessageType =
    MessageType::from_u128(0x0191cff5_1f42_71a2_ae23_3af1fac4279f);
pub const ANNOUNCE_GROUP: MessageType =
    MessageType::from_u128(0x0191cff5_1f42_74e8_a0e9_a9cd969680de);
pub const JOIN_GROUP: MessageType = MessageType::from_u128(0x0191cff5_1f42_73ce_ac38_3c74c9655cdf);
pub const ACCEPT_JOIN_REQUEST: MessageType =
    MessageType::from_u128(0x0191cff5_1f42_7c59_8716_dda08db61050);
pub const ANNOUNCE_MEMBER: MessageType =
    MessageType::from_u128(0x0191cff5_1f42_78b5_91a3_278d4bd58de1);
pub const HEARTBEAT: MessageType = MessageType::from_u128(0x0191cff5_1f42_7802_9c79_184f49e562f5);
pub const CAMPAIGN: MessageType = MessageType::from_u128(0x0191cff5_1f42_7eb5_a018_44eb50286c41);
pub const RECOGNIZE: MessageType = MessageType::from_u128(0x0191cff5_1f42_764f_aa14_83cfa9bae5a7);
pub const SHARE_DH_KEY: MessageType =
    MessageType::from_u128(0x0191fcd2_8bd7_7b79_a684_687b02ac9455);

/// Diagnostic names for the overlay message types.
pub const TYPE_NAMES: [(MessageType, &str); 12] = [
    (DISCOVER, "DISCOVER"),
    (DISCOVER_RESPONSE, "DISCOVER_RESPONSE"),
    (PEERS, "PEERS"),
    (PEERS_RESPONSE, "PEERS_RESPONSE"),
    (ANNOUNCE_GROUP, "ANNOUNCE_GROUP"),
    (JOIN_GROUP, "JOIN_GROUP"),
    (ACCEPT_JOIN_REQUEST, "ACCEPT_JOIN_REQUEST"),
    (ANNOUNCE_MEMBER, "ANNOUNCE_MEMBER"),
    (HEARTBEAT, "HEARTBEAT"),
    (CAMPAIGN, "CAMPAIGN"),
    (RECOGNIZE, "RECOGNIZE"),
    (SHARE_DH_KEY, "SHARE_DH_KEY"),
];

// ── Groups ────────────────────────────────────────────────────────────

/// A group is identified by its interest and its name, both UUIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub interest: Uuid,
    pub name: Uuid,
}

impl GroupKey {
    pub fn new(interest: Uuid, name: Uuid) -> Self {
        Self { interest, name }
    }

    /// Read `intr` and `name` from a payload.
    pub fn from_fields(fields: &TaggedFields) -> Option<Self> {
        Some(Self {
            interest: uuid_field(fields, tags::INTR)?,
            name: uuid_field(fields, tags::NAME)?,
        })
    }

    /// Replace `intr` and `name` on a payload.
    pub fn write_to(&self, fields: &mut TaggedFields) {
        fields.clear_and_set(tags::INTR, Bytes::copy_from_slice(self.interest.as_bytes()));
        fields.clear_and_set(tags::NAME, Bytes::copy_from_slice(self.name.as_bytes()));
    }

    /// A fresh payload of type `ty` addressed to this group.
    pub fn message(&self, ty: MessageType) -> TaggedFields {
        let mut fields = TaggedFields::new().with(tags::TYPE, ty.to_bytes());
        self.write_to(&mut fields);
        fields
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.interest, self.name)
    }
}

// ── Field helpers ─────────────────────────────────────────────────────

pub(crate) fn uuid_field(fields: &TaggedFields, tag: pluto_transport::Tag) -> Option<Uuid> {
    fields.get(tag).and_then(|v| Uuid::from_slice(v).ok())
}

pub(crate) fn parse_address(value: &[u8]) -> Option<SocketAddr> {
    std::str::from_utf8(value).ok()?.parse().ok()
}

pub(crate) fn parse_identity(value: &[u8]) -> Option<Identity> {
    Identity::from_readable(std::str::from_utf8(value).ok()?).ok()
}

/// Zip repeated `oadd`/`okey` entries, skipping pairs that do not parse.
pub(crate) fn address_pairs(fields: &TaggedFields) -> Vec<(SocketAddr, Identity)> {
    fields
        .get_all(tags::OADD)
        .zip(fields.get_all(tags::OKEY))
        .filter_map(|(addr, key)| Some((parse_address(addr)?, parse_identity(key)?)))
        .collect()
}

/// Append one `oadd`/`okey` pair.
pub(crate) fn push_address_pair(fields: &mut TaggedFields, address: SocketAddr, readable: &str) {
    fields.add(tags::OADD, address.to_string());
    fields.add(tags::OKEY, readable.to_string());
}

// ── Time ──────────────────────────────────────────────────────────────

/// Current Unix timestamp in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// `time` tag value: seconds since the epoch, 8 bytes big-endian.
pub(crate) fn time_value() -> Bytes {
    Bytes::copy_from_slice(&(now_ms() / 1000).to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pluto_transport::KeyAlgorithm;

    #[test]
    fn message_types_are_distinct() {
        for (i, (a, _)) in TYPE_NAMES.iter().enumerate() {
            for (b, _) in &TYPE_NAMES[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn wire_uuids_are_stable() {
        assert_eq!(DISCOVER.to_string(), "0191cff5-1f42-7dba-9a18-32570fe5d8f9");
        assert_eq!(SHARE_DH_KEY.to_string(), "0191fcd2-8bd7-7b79-a684-687b02ac9455");
    }

    #[test]
    fn group_key_round_trip_through_fields() {
        let key = GroupKey::new(Uuid::new_v4(), Uuid::new_v4());
        let fields = key.message(HEARTBEAT);
        assert_eq!(GroupKey::from_fields(&fields), Some(key));
        assert_eq!(MessageType::of(&fields), Some(HEARTBEAT));
    }

    #[test]
    fn group_key_requires_both_uuids() {
        let fields = TaggedFields::new().with(tags::INTR, Bytes::from_static(&[0u8; 16]));
        assert_eq!(GroupKey::from_fields(&fields), None);
    }

    #[test]
    fn write_to_replaces_existing() {
        let a = GroupKey::new(Uuid::new_v4(), Uuid::new_v4());
        let b = GroupKey::new(Uuid::new_v4(), Uuid::new_v4());
        let mut fields = a.message(HEARTBEAT);
        b.write_to(&mut fields);
        assert_eq!(fields.get_all(tags::INTR).count(), 1);
        assert_eq!(GroupKey::from_fields(&fields), Some(b));
    }

    #[test]
    fn address_pairs_skip_garbage() {
        let id = Identity::generate(KeyAlgorithm::Ed25519).unwrap();
        let mut fields = TaggedFields::new();
        push_address_pair(&mut fields, "10.0.0.1:4000".parse().unwrap(), id.readable());
        fields.add(tags::OADD, "not-an-address");
        fields.add(tags::OKEY, id.to_readable());
        push_address_pair(&mut fields, "10.0.0.2:4000".parse().unwrap(), "ed25519.garbage");

        let pairs = address_pairs(&fields);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, "10.0.0.1:4000".parse::<SocketAddr>().unwrap());
        assert_eq!(pairs[0].1, id);
    }

    #[test]
    fn time_value_is_eight_bytes() {
        assert_eq!(time_value().len(), 8);
    }
}
