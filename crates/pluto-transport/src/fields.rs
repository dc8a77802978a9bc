//! Tagged-field wire records.
//!
//! Every structure on the wire, the outer envelope and the inner application
//! payload alike, is a flat list of `(tag, value)` entries:
//!
//! ```text
//! +---------+----------------+-----------------+
//! | tag (4) | length (4, BE) | value (length)  |  ... repeated to end of buffer
//! +---------+----------------+-----------------+
//! ```
//!
//! Tags may repeat and order is significant.
use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::BadTag;

const TAG_LEN: usize = 4;
const SIZE_LEN: usize = 4;

/// A 4-byte field tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag([u8; TAG_LEN]);

impl Tag {
    pub const fn new(bytes: &[u8; TAG_LEN]) -> Self {
        Self(*bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TAG_LEN] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Tag {
    type Error = BadTag;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; TAG_LEN] = value.try_into().map_err(|_| BadTag(value.len()))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<&str> for Tag {
    type Error = BadTag;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.as_bytes())
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "Tag({s:?})"),
            Err(_) => write!(f, "Tag({:02x?})", self.0),
        }
    }
}

/// Well-known tags.
pub mod tags {
    use super::Tag;

    // Outer envelope
    pub const PKEY: Tag = Tag::new(b"pkey");
    pub const SIGN: Tag = Tag::new(b"sign");
    pub const ENCR: Tag = Tag::new(b"encr");
    pub const DATA: Tag = Tag::new(b"data");

    // Inner payload
    pub const TYPE: Tag = Tag::new(b"type");
    pub const INTR: Tag = Tag::new(b"intr");
    pub const NAME: Tag = Tag::new(b"name");
    pub const AKEY: Tag = Tag::new(b"akey");
    pub const OADD: Tag = Tag::new(b"oadd");
    pub const OKEY: Tag = Tag::new(b"okey");
    pub const TIME: Tag = Tag::new(b"time");
    pub const PRME: Tag = Tag::new(b"prme");
    pub const GENE: Tag = Tag::new(b"gene");
}

/// An ordered list of tagged values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaggedFields {
    entries: Vec<(Tag, Bytes)>,
}

impl TaggedFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`add`](Self::add).
    pub fn with(mut self, tag: Tag, value: impl Into<Bytes>) -> Self {
        self.add(tag, value);
        self
    }

    /// Append an entry. Existing entries with the same tag are kept.
    pub fn add(&mut self, tag: Tag, value: impl Into<Bytes>) {
        self.entries.push((tag, value.into()));
    }

    /// Replace the matching entry at `index` (negative counts from the end).
    ///
    /// No-op when no entry carries `tag`.
    pub fn set(&mut self, tag: Tag, value: impl Into<Bytes>, index: isize) {
        let positions: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, (t, _))| *t == tag)
            .map(|(i, _)| i)
            .collect();
        let Some(slot) = resolve_index(positions.len(), index) else {
            return;
        };
        self.entries[positions[slot]].1 = value.into();
    }

    /// Remove every entry carrying `tag`.
    pub fn clear(&mut self, tag: Tag) {
        self.entries.retain(|(t, _)| *t != tag);
    }

    pub fn clear_and_set(&mut self, tag: Tag, value: impl Into<Bytes>) {
        self.clear(tag);
        self.add(tag, value);
    }

    /// The last value carrying `tag`.
    pub fn get(&self, tag: Tag) -> Option<&Bytes> {
        self.get_at(tag, -1)
    }

    /// The value at `index` among entries carrying `tag`.
    ///
    /// Negative indices count from the end; the resolved index is clamped to
    /// the valid range.
    pub fn get_at(&self, tag: Tag, index: isize) -> Option<&Bytes> {
        let matches: Vec<&Bytes> = self.get_all(tag).collect();
        let slot = resolve_index(matches.len(), index)?;
        Some(matches[slot])
    }

    /// All values carrying `tag`, in insertion order.
    pub fn get_all(&self, tag: Tag) -> impl Iterator<Item = &Bytes> + '_ {
        self.entries
            .iter()
            .filter(move |(t, _)| *t == tag)
            .map(|(_, v)| v)
    }

    /// Distinct tags in first-seen order.
    pub fn tags(&self) -> Vec<Tag> {
        let mut seen = Vec::new();
        for (tag, _) in &self.entries {
            if !seen.contains(tag) {
                seen.push(*tag);
            }
        }
        seen
    }

    pub fn iter(&self) -> impl Iterator<Item = (Tag, &Bytes)> + '_ {
        self.entries.iter().map(|(t, v)| (*t, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode to the wire format.
    pub fn serialize(&self) -> Bytes {
        let size = self
            .entries
            .iter()
            .map(|(_, v)| TAG_LEN + SIZE_LEN + v.len())
            .sum();
        let mut buf = BytesMut::with_capacity(size);
        for (tag, value) in &self.entries {
            buf.put_slice(tag.as_bytes());
            buf.put_u32(value.len() as u32);
            buf.put_slice(value);
        }
        buf.freeze()
    }

    /// Decode from the wire format.
    ///
    /// Stops at the first entry whose header or value would run past the end
    /// of `data`; complete entries before it are kept.
    pub fn deserialize(data: &[u8]) -> Self {
        let data = Bytes::copy_from_slice(data);
        let mut fields = Self::new();
        let mut offset = 0;
        while data.len() - offset >= TAG_LEN + SIZE_LEN {
            let mut tag = [0u8; TAG_LEN];
            tag.copy_from_slice(&data[offset..offset + TAG_LEN]);
            let mut size = [0u8; SIZE_LEN];
            size.copy_from_slice(&data[offset + TAG_LEN..offset + TAG_LEN + SIZE_LEN]);
            let size = u32::from_be_bytes(size) as usize;

            let start = offset + TAG_LEN + SIZE_LEN;
            if data.len() - start < size {
                break;
            }
            fields.add(Tag(tag), data.slice(start..start + size));
            offset = start + size;
        }
        fields
    }
}

impl FromIterator<(Tag, Bytes)> for TaggedFields {
    fn from_iter<I: IntoIterator<Item = (Tag, Bytes)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

fn resolve_index(len: usize, index: isize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let resolved = if index < 0 {
        len as isize + index
    } else {
        index
    };
    Some(resolved.clamp(0, len as isize - 1) as usize)
}
