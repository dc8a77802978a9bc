//! Ordered, short-circuiting message listeners.
//!
//! Listeners are matched against the payload's `type` (or registered as
//! wildcards) and run in registration order. Each returns a [`Flow`]: `Next`
//! hands the payload to the following matching listener, `Stop` ends
//! dispatch.

use crate::{MessageType, Origin, TaggedFields};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Stop,
    Next,
}

pub type Listener<C> = Box<dyn FnMut(&mut C, &Origin, &TaggedFields) -> Flow + Send>;

/// Listener chain over a handler context `C`.
pub struct Listeners<C> {
    entries: Vec<(Option<MessageType>, Listener<C>)>,
}

impl<C> Default for Listeners<C> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<C> Listeners<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen for one message type.
    pub fn on(
        &mut self,
        ty: MessageType,
        listener: impl FnMut(&mut C, &Origin, &TaggedFields) -> Flow + Send + 'static,
    ) {
        self.entries.push((Some(ty), Box::new(listener)));
    }

    /// Listen for every payload.
    pub fn on_any(
        &mut self,
        listener: impl FnMut(&mut C, &Origin, &TaggedFields) -> Flow + Send + 'static,
    ) {
        self.entries.push((None, Box::new(listener)));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run matching listeners in order. Returns [`Flow::Stop`] if one of
    /// them stopped the chain.
    ///
    /// Payloads without a valid 16-byte `type` only reach wildcards.
    pub fn dispatch(&mut self, ctx: &mut C, origin: &Origin, fields: &TaggedFields) -> Flow {
        let ty = MessageType::of(fields);
        for (filter, listener) in &mut self.entries {
            let matches = match filter {
                None => true,
                Some(filter) => Some(*filter) == ty,
            };
            if matches && listener(ctx, origin, fields) == Flow::Stop {
                return Flow::Stop;
            }
        }
        Flow::Next
    }
}
