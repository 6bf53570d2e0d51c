//! FIFO buffer for messages sent while the connection is down.

use std::collections::VecDeque;

use serde_json::Value;

/// Pending outbound messages, oldest first.
///
/// Unbounded unless a capacity is given; a full buffer drops its oldest
/// message to make room.
#[derive(Debug, Default)]
pub struct OutboundBuffer {
    queue: VecDeque<Value>,
    capacity: Option<usize>,
}

impl OutboundBuffer {
    /// Create an empty buffer. A capacity of `Some(0)` means unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity: capacity.filter(|&c| c > 0),
        }
    }

    /// Append a message. Returns the message evicted to respect the
    /// capacity, if any.
    pub fn enqueue(&mut self, message: Value) -> Option<Value> {
        let evicted = match self.capacity {
            Some(cap) if self.queue.len() >= cap => self.queue.pop_front(),
            _ => None,
        };
        self.queue.push_back(message);
        evicted
    }

    /// Take every pending message in insertion order, leaving the buffer
    /// empty. Messages enqueued afterwards go into the now-fresh queue.
    pub fn drain(&mut self) -> VecDeque<Value> {
        std::mem::take(&mut self.queue)
    }

    /// Put back messages that could not be written, ahead of anything
    /// enqueued since the drain, keeping their original order.
    pub fn requeue_front(&mut self, unsent: VecDeque<Value>) {
        let newer = std::mem::replace(&mut self.queue, unsent);
        self.queue.extend(newer);
    }

    /// Number of pending messages.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Configured bound, or `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}
