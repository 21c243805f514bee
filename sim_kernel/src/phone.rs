//! Per-task phone capability table and phone kernel objects
//!
//! The table is a bounded array of slots; a handle is a slot index.
//! Allocation always takes the lowest free slot, so a freed handle is the
//! next one handed out.
//!
//! A slot goes through `allocate → (publish) → free`. Only published slots
//! are visible to user code (`lookup`); unpublished slots are reserved for
//! phones that are still connecting.

use core_types::{CapabilityError, PhoneHandle, PhoneHash, PhoneState, TaskId};

#[derive(Debug, Clone, Copy)]
struct PhoneSlot {
    hash: PhoneHash,
    published: bool,
}

/// Bounded per-task phone table
#[derive(Debug, Clone)]
pub struct PhoneTable {
    slots: Vec<Option<PhoneSlot>>,
}

impl PhoneTable {
    /// Creates a table with `capacity` slots
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    /// Returns the number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of occupied slots
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Reserves the lowest free slot for a phone object
    pub fn allocate(&mut self, hash: PhoneHash) -> Result<PhoneHandle, CapabilityError> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(CapabilityError::TableFull)?;
        self.slots[index] = Some(PhoneSlot {
            hash,
            published: false,
        });
        Ok(PhoneHandle::new(index as u32))
    }

    /// Makes an allocated slot visible to user code
    pub fn publish(&mut self, handle: PhoneHandle) -> Result<(), CapabilityError> {
        self.slot_mut(handle)?.published = true;
        Ok(())
    }

    /// Hides a slot from user code without freeing it
    pub fn unpublish(&mut self, handle: PhoneHandle) -> Result<PhoneHash, CapabilityError> {
        let slot = self.slot_mut(handle)?;
        slot.published = false;
        Ok(slot.hash)
    }

    /// Resolves a published handle
    pub fn lookup(&self, handle: PhoneHandle) -> Result<PhoneHash, CapabilityError> {
        match self.slots.get(handle.slot() as usize) {
            Some(Some(slot)) if slot.published => Ok(slot.hash),
            _ => Err(CapabilityError::NotAllocated(handle)),
        }
    }

    /// Releases a slot, published or not
    pub fn free(&mut self, handle: PhoneHandle) -> Result<PhoneHash, CapabilityError> {
        self.slots
            .get_mut(handle.slot() as usize)
            .and_then(Option::take)
            .map(|slot| slot.hash)
            .ok_or(CapabilityError::NotAllocated(handle))
    }

    /// Returns every occupied slot
    pub fn entries(&self) -> Vec<(PhoneHandle, PhoneHash)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|s| (PhoneHandle::new(i as u32), s.hash)))
            .collect()
    }

    fn slot_mut(&mut self, handle: PhoneHandle) -> Result<&mut PhoneSlot, CapabilityError> {
        self.slots
            .get_mut(handle.slot() as usize)
            .and_then(Option::as_mut)
            .ok_or(CapabilityError::NotAllocated(handle))
    }
}

/// Kernel-side phone object
///
/// The object outlives its handle while calls sent through it are still
/// unanswered (`active_calls > 0`).
#[derive(Debug, Clone)]
pub struct PhoneObject {
    /// Kernel-wide identity
    pub hash: PhoneHash,
    /// Task whose table holds the handle
    pub owner: TaskId,
    /// Task whose answerbox receives the calls
    pub callee: Option<TaskId>,
    /// Lifecycle state
    pub state: PhoneState,
    /// Handle in the owner's table, `None` once deallocated
    pub handle: Option<PhoneHandle>,
    /// Calls sent through the phone and not yet answered
    pub active_calls: usize,
}

impl PhoneObject {
    /// Creates a phone in the `Connecting` state
    pub fn new(hash: PhoneHash, owner: TaskId, handle: PhoneHandle) -> Self {
        Self {
            hash,
            owner,
            callee: None,
            state: PhoneState::Connecting,
            handle: Some(handle),
            active_calls: 0,
        }
    }

    /// Returns true once nothing references the object any more
    pub fn is_reclaimable(&self) -> bool {
        self.handle.is_none() && self.active_calls == 0
    }
}
