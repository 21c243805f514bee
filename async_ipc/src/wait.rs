//! Wait descriptors
//!
//! Every entity a fibril can block on (a connection, an outstanding send, a
//! sleep) embeds one [`WaitDescriptor`]. The descriptor is the only link
//! between the entity and the suspended fibril: whoever satisfies the wait
//! activates the descriptor, which wakes the fibril.

use core_types::{FibrilId, PhoneHash, SendId};
use kernel_api::Instant;
use std::task::Waker;

/// Key of a wait descriptor in the timeout queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Waiter {
    Connection(PhoneHash),
    Send(SendId),
    Sleep(u64),
}

/// Suspension state of one waitable entity
#[derive(Debug, Clone)]
pub(crate) struct WaitDescriptor {
    /// Fibril suspended on the entity
    pub owner: Option<FibrilId>,
    /// False while the owner is suspended and nothing has woken it
    pub active: bool,
    /// Deadline of the current wait
    pub expires_at: Option<Instant>,
    /// Mirrors membership in the timeout queue
    pub in_timeout_queue: bool,
    /// Set when the deadline, not the awaited event, ended the wait
    pub fired: bool,
    waker: Option<Waker>,
}

impl WaitDescriptor {
    /// Creates an idle descriptor
    pub fn new() -> Self {
        Self {
            owner: None,
            active: true,
            expires_at: None,
            in_timeout_queue: false,
            fired: false,
            waker: None,
        }
    }

    /// Marks the start of a wait
    pub fn prepare(&mut self, owner: Option<FibrilId>, expires_at: Option<Instant>) {
        self.owner = owner;
        self.active = false;
        self.expires_at = expires_at;
        self.fired = false;
    }

    /// Returns true while a fibril is suspended on the entity
    pub fn is_suspended(&self) -> bool {
        !self.active
    }

    /// Remembers how to wake the suspended fibril
    pub fn register(&mut self, waker: &Waker) {
        match &self.waker {
            Some(existing) if existing.will_wake(waker) => {}
            _ => self.waker = Some(waker.clone()),
        }
    }

    /// Ends the wait because the awaited event happened
    pub fn activate(&mut self) {
        self.active = true;
        self.owner = None;
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }

    /// Ends the wait because its deadline passed
    pub fn fire(&mut self) {
        self.in_timeout_queue = false;
        self.fired = true;
        self.activate();
    }
}

impl Default for WaitDescriptor {
    fn default() -> Self {
        Self::new()
    }
}
