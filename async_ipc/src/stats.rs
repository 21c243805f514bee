//! Runtime statistics

use serde::{Deserialize, Serialize};

/// Counters kept by one runtime instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStats {
    /// Times a fibril suspended into the manager
    pub suspensions: u64,
    /// Deadlines that ended a wait
    pub timeouts_fired: u64,
    /// Calls queued on a connection
    pub routed: u64,
    /// Calls answered with `EHANGUP` because no connection matched
    pub unmatched: u64,
    /// Connections opened
    pub opened: u64,
    /// Connections torn down
    pub closed: u64,
    /// Replies dropped because their send had been discarded
    pub replies_discarded: u64,
    /// Notifications handed to the notification handler
    pub notifications: u64,
}
