//! Phone Audit Trail
//!
//! Records every phone lifecycle transition the simulated kernel performs,
//! stamped with virtual time, so tests can assert on the exact sequence.
//!
//! ## Example
//!
//! ```
//! use sim_kernel::phone_audit::PhoneAuditLog;
//! use core_types::{PhoneEvent, PhoneHash};
//! use kernel_api::Instant;
//!
//! let mut audit_log = PhoneAuditLog::new();
//! audit_log.record_event(
//!     Instant::from_nanos(1000),
//!     PhoneEvent::Destroyed { hash: PhoneHash::from_raw(7) },
//! );
//!
//! assert_eq!(audit_log.len(), 1);
//! assert_eq!(audit_log.events_for(PhoneHash::from_raw(7)).len(), 1);
//! ```

use core_types::{PhoneEvent, PhoneHash};
use kernel_api::Instant;

/// A single audit event with timestamp
#[derive(Debug, Clone)]
pub struct PhoneAuditEvent {
    /// Simulated time when the event occurred
    pub timestamp: Instant,
    /// The phone event that occurred
    pub event: PhoneEvent,
}

/// Chronological record of phone events
#[derive(Debug, Default)]
pub struct PhoneAuditLog {
    events: Vec<PhoneAuditEvent>,
}

impl PhoneAuditLog {
    /// Creates a new empty audit log
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Records a phone event at the specified time
    pub fn record_event(&mut self, timestamp: Instant, event: PhoneEvent) {
        self.events.push(PhoneAuditEvent { timestamp, event });
    }

    /// Returns all recorded events
    pub fn get_events(&self) -> &[PhoneAuditEvent] {
        &self.events
    }

    /// Returns events naming a specific phone object
    pub fn events_for(&self, hash: PhoneHash) -> Vec<&PhoneAuditEvent> {
        self.events
            .iter()
            .filter(|e| e.event.hash() == Some(hash))
            .collect()
    }

    /// Counts events matching the predicate
    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&PhoneEvent) -> bool,
    {
        self.events.iter().filter(|e| predicate(&e.event)).count()
    }

    /// Checks if any event matches the predicate
    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&PhoneEvent) -> bool,
    {
        self.events.iter().any(|e| predicate(&e.event))
    }

    /// Clears all events
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Returns the number of recorded events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Checks if the audit log is empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{PhoneHandle, TaskId};

    #[test]
    fn test_audit_log_creation() {
        let log = PhoneAuditLog::new();
        assert_eq!(log.len(), 0);
        assert!(log.is_empty());
    }

    #[test]
    fn test_events_for_filters_by_hash() {
        let mut log = PhoneAuditLog::new();
        let owner = TaskId::new();
        let a = PhoneHash::from_raw(1);
        let b = PhoneHash::from_raw(2);

        log.record_event(
            Instant::from_nanos(10),
            PhoneEvent::Allocated {
                owner,
                handle: PhoneHandle::new(0),
                hash: a,
            },
        );
        log.record_event(
            Instant::from_nanos(20),
            PhoneEvent::HungUp { owner, hash: b },
        );
        log.record_event(Instant::from_nanos(30), PhoneEvent::Destroyed { hash: a });

        let for_a = log.events_for(a);
        assert_eq!(for_a.len(), 2);
        assert_eq!(for_a[1].timestamp, Instant::from_nanos(30));
        assert_eq!(log.events_for(b).len(), 1);
    }

    #[test]
    fn test_count_and_clear() {
        let mut log = PhoneAuditLog::new();
        let hash = PhoneHash::from_raw(5);
        log.record_event(Instant::ZERO, PhoneEvent::Destroyed { hash });
        log.record_event(Instant::ZERO, PhoneEvent::Destroyed { hash });

        assert_eq!(
            log.count_events(|e| matches!(e, PhoneEvent::Destroyed { .. })),
            2
        );
        assert!(!log.has_event(|e| matches!(e, PhoneEvent::Slammed { .. })));

        log.clear();
        assert!(log.is_empty());
    }
}
