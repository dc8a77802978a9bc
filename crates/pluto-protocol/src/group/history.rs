use std::collections::VecDeque;

use pluto_transport::{MessageType, TaggedFields};

/// Default number of messages kept per group.
pub const DEFAULT_HISTORY_CAPACITY: usize = 256;

/// A group message as received locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMessage {
    /// Readable identity of the signer.
    pub author: String,
    pub msg_type: Option<MessageType>,
    pub fields: TaggedFields,
    /// Local receive time, Unix milliseconds.
    pub received_at: u64,
}

/// Bounded per-group message log; the oldest entry is evicted first.
#[derive(Debug, Clone)]
pub struct GroupHistory {
    capacity: usize,
    messages: VecDeque<GroupMessage>,
}

impl GroupHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            messages: VecDeque::new(),
        }
    }

    pub fn push(&mut self, message: GroupMessage) {
        if self.capacity == 0 {
            return;
        }
        while self.messages.len() >= self.capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages oldest first.
    pub fn messages(&self) -> impl Iterator<Item = &GroupMessage> + '_ {
        self.messages.iter()
    }
}
