/// Group data structures for the Pluto overlay.
///
/// One member of each group acts as leader and fans out group traffic to
/// the others. Leadership is decided by a bully-style campaign with no
/// terms: the last accepted claim wins.
use std::collections::BTreeSet;
use std::time::Instant;

use bytes::Bytes;
use pluto_transport::Identity;

use crate::types::GroupKey;

// ── Leadership ───────────────────────────────────────────────────────────

/// Local view of a group's leadership. Every timer lives in the variant,
/// so leaving a state cancels its timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Leadership {
    /// Someone else leads; campaign if no heartbeat arrives by the deadline.
    Follower { failure_deadline: Instant },
    /// We claimed leadership and are collecting recognitions.
    LeaderElect {
        next_heartbeat: Instant,
        recognized: BTreeSet<String>,
    },
    /// We lead with a recognition quorum and send heartbeats.
    Leader { next_heartbeat: Instant },
}

impl Leadership {
    pub fn role(&self) -> Role {
        match self {
            Leadership::Follower { .. } => Role::Follower,
            Leadership::LeaderElect { .. } => Role::LeaderElect,
            Leadership::Leader { .. } => Role::Leader,
        }
    }

    /// The only deadline armed in this state.
    pub fn deadline(&self) -> Instant {
        match self {
            Leadership::Follower { failure_deadline } => *failure_deadline,
            Leadership::LeaderElect { next_heartbeat, .. } => *next_heartbeat,
            Leadership::Leader { next_heartbeat } => *next_heartbeat,
        }
    }
}

/// [`Leadership`] without its timers, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    LeaderElect,
    Leader,
}

// ── Group ────────────────────────────────────────────────────────────────

/// A group this node belongs to.
#[derive(Debug, Clone)]
pub struct Group {
    pub key: GroupKey,
    /// Shared credential checked on join.
    pub access_key: Bytes,
    pub leader: Identity,
    pub leadership: Leadership,
    /// Readable identities of the other members. Never contains the local
    /// node.
    pub members: BTreeSet<String>,
    /// Re-announce on every discovery tick while leading.
    pub announce: bool,
}

impl Group {
    pub fn is_led_by(&self, identity: &Identity) -> bool {
        self.leader == *identity
    }

    pub fn summary(&self) -> GroupSummary {
        GroupSummary {
            key: self.key,
            leader: self.leader.clone(),
            role: self.leadership.role(),
            members: self.members.iter().cloned().collect(),
        }
    }
}

/// Snapshot of an own group for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSummary {
    pub key: GroupKey,
    pub leader: Identity,
    pub role: Role,
    pub members: Vec<String>,
}

/// A group seen in an announcement but not joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownGroup {
    pub key: GroupKey,
    /// Readable identities of announcers, in first-heard order.
    pub announcers: Vec<String>,
}

impl KnownGroup {
    pub fn new(key: GroupKey, announcer: String) -> Self {
        Self {
            key,
            announcers: vec![announcer],
        }
    }

    /// Returns `true` if the announcer is new.
    pub fn add_announcer(&mut self, announcer: &str) -> bool {
        if self.announcers.iter().any(|a| a == announcer) {
            return false;
        }
        self.announcers.push(announcer.to_string());
        true
    }
}
