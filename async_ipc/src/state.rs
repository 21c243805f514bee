//! The runtime's guarded state
//!
//! Everything the manager and the fibrils share lives in [`AsyncState`],
//! behind a single `RefCell`. It is only ever borrowed inside a closure
//! that runs to completion, never across a suspension point.

use crate::correlation::CorrelationTable;
use crate::registry::ConnectionRegistry;
use crate::timeout::TimeoutQueue;
use crate::wait::{WaitDescriptor, Waiter};
use crate::{RuntimeConfig, RuntimeStats};
use core_types::FibrilId;
use kernel_api::Instant;
use std::collections::HashMap;
use tracing::trace;

pub(crate) struct AsyncState {
    pub config: RuntimeConfig,
    pub timeouts: TimeoutQueue<Waiter>,
    pub registry: ConnectionRegistry,
    pub sends: CorrelationTable,
    pub sleepers: HashMap<u64, WaitDescriptor>,
    pub next_sleep: u64,
    pub stats: RuntimeStats,
}

impl AsyncState {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            timeouts: TimeoutQueue::new(),
            registry: ConnectionRegistry::new(),
            sends: CorrelationTable::new(config.max_outstanding_sends),
            sleepers: HashMap::new(),
            next_sleep: 1,
            stats: RuntimeStats::default(),
        }
    }

    pub fn descriptor_mut(&mut self, waiter: Waiter) -> Option<&mut WaitDescriptor> {
        match waiter {
            Waiter::Connection(hash) => self.registry.get_mut(hash).map(|c| &mut c.wait),
            Waiter::Send(send) => self.sends.get_mut(send).map(|s| &mut s.wait),
            Waiter::Sleep(id) => self.sleepers.get_mut(&id),
        }
    }

    /// Prepares `owner` to suspend on `waiter`, optionally until `deadline`
    pub fn arm(&mut self, waiter: Waiter, owner: Option<FibrilId>, deadline: Option<Instant>) {
        match self.descriptor_mut(waiter) {
            Some(wait) => wait.prepare(owner, deadline),
            None => return,
        }
        if let Some(deadline) = deadline {
            self.timeouts.insert(waiter, deadline);
            if let Some(wait) = self.descriptor_mut(waiter) {
                wait.in_timeout_queue = true;
            }
        }
        self.stats.suspensions += 1;
    }

    /// Ends every wait whose deadline is at or before `now`
    pub fn fire_expired(&mut self, now: Instant) -> usize {
        let expired = self.timeouts.pop_expired(now);
        for waiter in &expired {
            trace!(?waiter, %now, "timeout fired");
            if let Some(wait) = self.descriptor_mut(*waiter) {
                wait.fire();
            }
            // A fired sleep is over whether or not its fibril is still alive
            if let Waiter::Sleep(id) = waiter {
                self.sleepers.remove(id);
            }
        }
        self.stats.timeouts_fired += expired.len() as u64;
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_and_fire_sleep() {
        let mut state = AsyncState::new(RuntimeConfig::default());
        state.sleepers.insert(1, WaitDescriptor::new());
        state.sleepers.insert(2, WaitDescriptor::new());

        state.arm(Waiter::Sleep(2), None, Some(Instant::from_nanos(10)));
        state.arm(Waiter::Sleep(1), None, Some(Instant::from_nanos(20)));
        assert_eq!(state.stats.suspensions, 2);
        assert_eq!(state.timeouts.earliest(), Some(Instant::from_nanos(10)));

        assert_eq!(state.fire_expired(Instant::from_nanos(15)), 1);
        assert!(!state.sleepers.contains_key(&2));
        assert!(!state.sleepers[&1].fired);
        assert!(state.sleepers[&1].in_timeout_queue);
        assert_eq!(state.stats.timeouts_fired, 1);
    }

    #[test]
    fn test_arm_without_deadline_skips_timeout_queue() {
        let mut state = AsyncState::new(RuntimeConfig::default());
        state.sleepers.insert(1, WaitDescriptor::new());
        state.arm(Waiter::Sleep(1), None, None);

        assert!(state.timeouts.is_empty());
        assert!(state.sleepers[&1].is_suspended());
    }
}
