//! Fixed-capacity FIFO of inbound messages.

use std::collections::VecDeque;

use crate::domain::message::InboundMessage;

/// Default number of messages kept per server.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Bounded, ordered message history.
///
/// Messages are kept in push order.  Because the relay assigns ids from a
/// monotonically increasing counter and pushes in arrival order, the buffer
/// is also sorted by id, which lets [`since`](Self::since) binary-search.
#[derive(Debug, Clone)]
pub struct MessageBuffer {
    capacity: usize,
    messages: VecDeque<InboundMessage>,
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MessageBuffer {
    /// Creates an empty buffer.  A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            messages: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Appends `msg`, evicting the oldest message when full.
    ///
    /// Returns the evicted message, if any.  Overflow is not an error.
    pub fn push(&mut self, msg: InboundMessage) -> Option<InboundMessage> {
        let evicted = if self.messages.len() >= self.capacity {
            self.messages.pop_front()
        } else {
            None
        };
        self.messages.push_back(msg);
        evicted
    }

    /// The newest `limit` messages, oldest first.
    pub fn latest(&self, limit: usize) -> Vec<InboundMessage> {
        let skip = self.messages.len().saturating_sub(limit);
        self.messages.iter().skip(skip).cloned().collect()
    }

    /// Up to `limit` messages with an id strictly greater than `after_id`,
    /// oldest first.
    pub fn since(&self, after_id: u64, limit: usize) -> Vec<InboundMessage> {
        let start = self.messages.partition_point(|m| m.id <= after_id);
        self.messages.iter().skip(start).take(limit).cloned().collect()
    }

    /// Iterates over the buffered messages, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &InboundMessage> {
        self.messages.iter()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
