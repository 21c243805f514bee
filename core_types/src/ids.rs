//! Unique identifiers for system entities

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a kernel task
///
/// A task owns one answerbox and one phone table. Every runtime instance
/// runs on behalf of exactly one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new random task ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a task ID from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Declares a word-sized identifier newtype.
///
/// These identities are handed out by counters (kernel or runtime), never
/// forged by user code, so they carry no randomness.
macro_rules! word_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw word
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the raw word
            pub const fn as_raw(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), self.0)
            }
        }
    };
}

word_id!(
    /// Opaque token correlating a kernel call with its eventual answer
    CallId,
    "Call"
);

word_id!(
    /// Identity of an outstanding asynchronous send inside a runtime
    SendId,
    "Send"
);

word_id!(
    /// Identity of a cooperative task (fibril) inside a runtime
    FibrilId,
    "Fibril"
);

word_id!(
    /// Kernel-wide identity of a phone object
    ///
    /// This is what a server sees as the "source phone hash" of every call
    /// arriving through the phone. It stays stable for the lifetime of the
    /// phone object and is never reused.
    PhoneHash,
    "PhoneHash"
);

/// Per-task capability handle naming a phone
///
/// Handles are slot indices into the owning task's phone table and are
/// reused once freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PhoneHandle(u32);

impl PhoneHandle {
    /// Creates a handle from a slot index
    pub const fn new(slot: u32) -> Self {
        Self(slot)
    }

    /// Returns the slot index
    pub const fn slot(&self) -> u32 {
        self.0
    }

    /// Encodes the handle as an IPC argument word
    pub const fn to_word(&self) -> u64 {
        self.0 as u64
    }

    /// Decodes a handle from an IPC argument word
    pub fn from_word(word: u64) -> Option<Self> {
        u32::try_from(word).ok().map(Self)
    }
}

impl fmt::Display for PhoneHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Phone({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_creation() {
        let id1 = TaskId::new();
        let id2 = TaskId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_task_id_from_uuid() {
        let uuid = Uuid::new_v4();
        let id = TaskId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn test_word_ids_display() {
        assert_eq!(format!("{}", CallId::from_raw(7)), "Call(7)");
        assert_eq!(format!("{}", SendId::from_raw(3)), "Send(3)");
        assert_eq!(format!("{}", PhoneHash::from_raw(9)), "PhoneHash(9)");
    }

    #[test]
    fn test_phone_handle_word_conversion() {
        let handle = PhoneHandle::new(5);
        assert_eq!(PhoneHandle::from_word(handle.to_word()), Some(handle));
        assert_eq!(PhoneHandle::from_word(u64::MAX), None);
    }
}
