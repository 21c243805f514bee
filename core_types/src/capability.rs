//! Phone capability model
//!
//! Every send in the system is addressed through a phone: a capability
//! object owned by one task and connected to another task's answerbox.
//!
//! ## Lifecycle
//!
//! ```text
//! allocate ──► Connecting ──connect ok──► Connected ──caller hangup──► Hungup
//!                  │                          │
//!                  └──connect failed──► freed └──peer hangup──► Slammed
//! ```
//!
//! A phone in `Hungup` or `Slammed` rejects new sends locally. The backing
//! object outlives its handle until every call sent through it is answered.

use crate::{PhoneHandle, PhoneHash, TaskId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// State of a phone object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhoneState {
    /// Allocated, waiting for the peer to accept the connection
    Connecting,
    /// Usable for sends
    Connected,
    /// The owner hung up
    Hungup,
    /// The peer answerbox refused or went away
    Slammed,
}

impl PhoneState {
    /// Returns true if calls may be sent through the phone
    pub fn accepts_calls(&self) -> bool {
        matches!(self, PhoneState::Connected)
    }

    /// Returns true if the phone is permanently disconnected
    pub fn is_disconnected(&self) -> bool {
        matches!(self, PhoneState::Hungup | PhoneState::Slammed)
    }
}

impl fmt::Display for PhoneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhoneState::Connecting => "connecting",
            PhoneState::Connected => "connected",
            PhoneState::Hungup => "hung up",
            PhoneState::Slammed => "slammed",
        };
        f.write_str(name)
    }
}

/// Errors of the per-task phone table
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CapabilityError {
    /// Every slot of the table is in use
    #[error("Phone table exhausted")]
    TableFull,
    /// The handle does not name an allocated slot
    #[error("No phone allocated at {0}")]
    NotAllocated(PhoneHandle),
}

/// Phone lifecycle event, recorded by the kernel's audit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhoneEvent {
    /// A handle was reserved in the owner's table
    Allocated {
        owner: TaskId,
        handle: PhoneHandle,
        hash: PhoneHash,
    },
    /// The handle became visible to user code
    Published { owner: TaskId, handle: PhoneHandle },
    /// The peer accepted the connection
    Connected {
        owner: TaskId,
        hash: PhoneHash,
        callee: TaskId,
    },
    /// The peer refused the connection; the handle was released
    ConnectFailed { owner: TaskId, hash: PhoneHash },
    /// The owner hung up
    HungUp { owner: TaskId, hash: PhoneHash },
    /// The peer hung up or terminated
    Slammed { owner: TaskId, hash: PhoneHash },
    /// A forward through the phone was refused
    ForwardFailed { forwarder: TaskId, hash: PhoneHash },
    /// The handle was removed from the owner's table
    Deallocated { owner: TaskId, handle: PhoneHandle },
    /// The backing object was freed
    Destroyed { hash: PhoneHash },
}

impl PhoneEvent {
    /// Returns the phone hash the event refers to, if it names one
    pub fn hash(&self) -> Option<PhoneHash> {
        match self {
            PhoneEvent::Allocated { hash, .. }
            | PhoneEvent::Connected { hash, .. }
            | PhoneEvent::ConnectFailed { hash, .. }
            | PhoneEvent::HungUp { hash, .. }
            | PhoneEvent::Slammed { hash, .. }
            | PhoneEvent::ForwardFailed { hash, .. }
            | PhoneEvent::Destroyed { hash } => Some(*hash),
            PhoneEvent::Published { .. } | PhoneEvent::Deallocated { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connected_accepts_calls() {
        assert!(PhoneState::Connected.accepts_calls());
        assert!(!PhoneState::Connecting.accepts_calls());
        assert!(!PhoneState::Hungup.accepts_calls());
        assert!(!PhoneState::Slammed.accepts_calls());
    }

    #[test]
    fn test_disconnected_states() {
        assert!(PhoneState::Hungup.is_disconnected());
        assert!(PhoneState::Slammed.is_disconnected());
        assert!(!PhoneState::Connecting.is_disconnected());
    }

    #[test]
    fn test_event_hash() {
        let hash = PhoneHash::from_raw(4);
        let event = PhoneEvent::Destroyed { hash };
        assert_eq!(event.hash(), Some(hash));

        let event = PhoneEvent::Published {
            owner: TaskId::new(),
            handle: PhoneHandle::new(0),
        };
        assert_eq!(event.hash(), None);
    }
}
