//! Timeout queue
//!
//! Pending waits sorted by absolute expiry. Entries with equal expiry keep
//! their registration order. The queue is expected to stay small (one entry
//! per suspended fibril with a deadline), so it is a sorted `VecDeque`
//! rather than a heap: removal by key is what the runtime does most.

use kernel_api::Instant;
use std::collections::VecDeque;

/// Ordered set of `(expiry, key)` pairs
#[derive(Debug, Clone)]
pub struct TimeoutQueue<K> {
    entries: VecDeque<(Instant, K)>,
}

impl<K: Copy + PartialEq> TimeoutQueue<K> {
    /// Creates an empty queue
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Schedules `key` to expire at `expires_at`
    ///
    /// The key goes after every entry expiring at the same instant. A key
    /// already present is rescheduled.
    pub fn insert(&mut self, key: K, expires_at: Instant) {
        self.remove(&key);
        let position = self
            .entries
            .iter()
            .position(|(expiry, _)| *expiry > expires_at)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, (expires_at, key));
    }

    /// Removes `key`; returns false if it was not queued
    pub fn remove(&mut self, key: &K) -> bool {
        match self.entries.iter().position(|(_, k)| k == key) {
            Some(position) => {
                self.entries.remove(position);
                true
            }
            None => false,
        }
    }

    /// Removes and returns every key expiring at or before `now`, earliest first
    pub fn pop_expired(&mut self, now: Instant) -> Vec<K> {
        let mut expired = Vec::new();
        while let Some((expiry, key)) = self.entries.front().copied() {
            if expiry > now {
                break;
            }
            self.entries.pop_front();
            expired.push(key);
        }
        expired
    }

    /// Returns the head expiry
    pub fn earliest(&self) -> Option<Instant> {
        self.entries.front().map(|(expiry, _)| *expiry)
    }

    /// Checks whether `key` is queued
    pub fn contains(&self, key: &K) -> bool {
        self.entries.iter().any(|(_, k)| k == key)
    }

    /// Returns the number of queued keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Copy + PartialEq> Default for TimeoutQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}
