/// Groups for the Pluto overlay.
///
/// Leader-relayed fan-out: one member leads each group and forwards group
/// traffic to everyone else. Pure state machines, no I/O.
pub mod election;
pub mod history;
pub mod types;

pub use election::{has_quorum, ElectionTiming, GroupTimer};
pub use history::{GroupHistory, GroupMessage, DEFAULT_HISTORY_CAPACITY};
pub use types::{Group, GroupSummary, KnownGroup, Leadership, Role};
