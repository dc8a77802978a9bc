/// Leader election and failure detection for a group.
///
/// Pure transitions over [`Group::leadership`]. Timers are deadlines passed
/// in as `now`; the caller sends whatever messages a transition implies
/// (campaigns, recognitions, heartbeats).
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use bytes::Bytes;
use pluto_transport::Identity;
use rand::Rng;

use crate::group::types::{Group, Leadership};
use crate::types::GroupKey;

/// Election timing derived from the heartbeat interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElectionTiming {
    pub heartbeat_interval: Duration,
    pub failure_timeout: Duration,
    pub max_jitter: Duration,
}

impl ElectionTiming {
    /// `failure_factor` scales the interval into the failure timeout;
    /// `jitter_factor` scales the timeout into the maximum random jitter.
    pub fn new(heartbeat_interval: Duration, failure_factor: f64, jitter_factor: f64) -> Self {
        let failure_timeout = heartbeat_interval.mul_f64(failure_factor.max(0.0));
        Self {
            heartbeat_interval,
            failure_timeout,
            max_jitter: failure_timeout.mul_f64(jitter_factor.max(0.0)),
        }
    }

    /// A failure deadline: timeout plus uniform jitter in `[0, max_jitter)`.
    pub fn failure_deadline<R: Rng + ?Sized>(&self, now: Instant, rng: &mut R) -> Instant {
        let jitter = if self.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(rng.random_range(0.0..self.max_jitter.as_secs_f64()))
        };
        now + self.failure_timeout + jitter
    }
}

impl Default for ElectionTiming {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), 1.1, 0.1)
    }
}

/// Recognition quorum. The candidate's own vote counts, so it needs strictly
/// more than half of the group including itself.
pub fn has_quorum(recognized: usize, members: usize) -> bool {
    2 * (recognized + 1) > members + 1
}

/// Which timer of a group has expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupTimer {
    FailureExpired,
    HeartbeatDue,
}

impl Group {
    /// A group created locally: we claim leadership immediately.
    pub fn new_led(
        key: GroupKey,
        access_key: Bytes,
        local: &Identity,
        announce: bool,
        now: Instant,
        timing: &ElectionTiming,
    ) -> Self {
        Self {
            key,
            access_key,
            leader: local.public(),
            leadership: Leadership::LeaderElect {
                next_heartbeat: now + timing.heartbeat_interval,
                recognized: BTreeSet::new(),
            },
            members: BTreeSet::new(),
            announce,
        }
    }

    /// A group joined through a leader: we follow with the failure timer
    /// armed.
    pub fn new_followed<R: Rng + ?Sized>(
        key: GroupKey,
        access_key: Bytes,
        leader: Identity,
        members: BTreeSet<String>,
        now: Instant,
        timing: &ElectionTiming,
        rng: &mut R,
    ) -> Self {
        Self {
            key,
            access_key,
            leader: leader.public(),
            leadership: Leadership::Follower {
                failure_deadline: timing.failure_deadline(now, rng),
            },
            members,
            announce: false,
        }
    }

    /// Appoint `leader`. No-op (returns `false`) if it already leads.
    ///
    /// Appointing ourselves starts a campaign round with an empty
    /// recognition set. Appointing someone else makes us follow; a follower
    /// keeps its already armed failure deadline.
    pub fn set_leader<R: Rng + ?Sized>(
        &mut self,
        leader: &Identity,
        local: &Identity,
        now: Instant,
        timing: &ElectionTiming,
        rng: &mut R,
    ) -> bool {
        if self.leader == *leader {
            return false;
        }

        self.leadership = if leader == local {
            Leadership::LeaderElect {
                next_heartbeat: now + timing.heartbeat_interval,
                recognized: BTreeSet::new(),
            }
        } else {
            let failure_deadline = match self.leadership {
                Leadership::Follower { failure_deadline } => failure_deadline,
                _ => timing.failure_deadline(now, rng),
            };
            Leadership::Follower { failure_deadline }
        };
        self.leader = leader.public();
        true
    }

    /// A heartbeat from `from`. Rearms the failure deadline when it comes
    /// from the leader we follow.
    pub fn register_heartbeat<R: Rng + ?Sized>(
        &mut self,
        from: &Identity,
        now: Instant,
        timing: &ElectionTiming,
        rng: &mut R,
    ) -> bool {
        if self.leader != *from {
            return false;
        }
        match &mut self.leadership {
            Leadership::Follower { failure_deadline } => {
                *failure_deadline = timing.failure_deadline(now, rng);
                true
            }
            _ => false,
        }
    }

    /// Count a recognition. Only meaningful while campaigning.
    pub fn recognize(&mut self, readable: &str) -> bool {
        match &mut self.leadership {
            Leadership::LeaderElect { recognized, .. } => recognized.insert(readable.to_string()),
            _ => false,
        }
    }

    pub fn quorum_reached(&self) -> bool {
        match &self.leadership {
            Leadership::Follower { .. } => false,
            Leadership::LeaderElect { recognized, .. } => {
                has_quorum(recognized.len(), self.members.len())
            }
            Leadership::Leader { .. } => true,
        }
    }

    /// LeaderElect → Leader once the quorum holds. The next heartbeat is
    /// due one interval from `now`; the caller sends one right away.
    pub fn confirm_leadership(&mut self, now: Instant, timing: &ElectionTiming) -> bool {
        if !matches!(self.leadership, Leadership::LeaderElect { .. }) || !self.quorum_reached() {
            return false;
        }
        self.leadership = Leadership::Leader {
            next_heartbeat: now + timing.heartbeat_interval,
        };
        true
    }

    /// Push the heartbeat timer one interval past `now`.
    pub fn reschedule_heartbeat(&mut self, now: Instant, timing: &ElectionTiming) {
        match &mut self.leadership {
            Leadership::LeaderElect { next_heartbeat, .. } | Leadership::Leader { next_heartbeat } => {
                *next_heartbeat = now + timing.heartbeat_interval;
            }
            Leadership::Follower { .. } => {}
        }
    }

    /// The expired timer, if any.
    pub fn due(&self, now: Instant) -> Option<GroupTimer> {
        if self.leadership.deadline() > now {
            return None;
        }
        Some(match self.leadership {
            Leadership::Follower { .. } => GroupTimer::FailureExpired,
            _ => GroupTimer::HeartbeatDue,
        })
    }
}
