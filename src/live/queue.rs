//! Bounded FIFO of outbound publishes held while the link is down

use crate::protocol::OutboundMessage;
use std::collections::VecDeque;

/// Publish queue with oldest-first eviction
#[derive(Debug)]
pub struct PublishQueue {
    messages: VecDeque<OutboundMessage>,
    capacity: usize,
    dropped: u64,
}

impl PublishQueue {
    /// A capacity of zero is treated as one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    /// Append a message, evicting and returning the oldest one when full
    pub fn push(&mut self, message: OutboundMessage) -> Option<OutboundMessage> {
        let evicted = if self.messages.len() >= self.capacity {
            self.dropped += 1;
            self.messages.pop_front()
        } else {
            None
        };
        self.messages.push_back(message);
        evicted
    }

    /// Oldest message, left in place until the transport accepts it
    pub fn front(&self) -> Option<&OutboundMessage> {
        self.messages.front()
    }

    pub fn pop_front(&mut self) -> Option<OutboundMessage> {
        self.messages.pop_front()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages evicted since creation
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutboundMessage> {
        self.messages.iter()
    }
}
