//! Bounded answerbox queue.
//!
//! Provides deterministic FIFO ordering with an explicit capacity limit for
//! incoming calls. Answers and kernel-generated calls bypass the limit: the
//! kernel must always be able to complete a conversation it started.

use kernel_api::KernelEvent;
use std::collections::VecDeque;

/// Queue error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    Full,
}

/// Bounded FIFO queue of kernel events.
#[derive(Debug, Clone)]
pub struct MessageQueue {
    capacity: usize,
    events: VecDeque<KernelEvent>,
}

impl MessageQueue {
    /// Creates a queue with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::new(),
        }
    }

    /// Returns the number of queued events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns whether another user call fits.
    pub fn has_room(&self) -> bool {
        self.events.len() < self.capacity
    }

    /// Pushes a user call, respecting the capacity.
    pub fn push(&mut self, event: KernelEvent) -> Result<(), QueueError> {
        if !self.has_room() {
            return Err(QueueError::Full);
        }
        self.events.push_back(event);
        Ok(())
    }

    /// Pushes an answer or kernel-generated call regardless of capacity.
    pub fn push_unbounded(&mut self, event: KernelEvent) {
        self.events.push_back(event);
    }

    /// Pops the next event.
    pub fn pop(&mut self) -> Option<KernelEvent> {
        self.events.pop_front()
    }

    /// Removes and returns every queued event.
    pub fn drain(&mut self) -> Vec<KernelEvent> {
        self.events.drain(..).collect()
    }
}
