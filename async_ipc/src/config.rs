//! Runtime configuration

use crate::AsyncError;
use serde::{Deserialize, Serialize};

/// Bounds of a runtime instance's tables
///
/// Exhausting `max_connections` refuses new connections with `ELIMIT`;
/// exhausting any other bound is reported as out-of-memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Live connections (one per source phone hash)
    pub max_connections: usize,
    /// Live fibrils, including connection handlers
    pub max_fibrils: usize,
    /// Sends issued and not yet collected or discarded
    pub max_outstanding_sends: usize,
    /// Messages queued on one connection and not yet received
    pub max_queued_messages: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_connections: 64,
            max_fibrils: 256,
            max_outstanding_sends: 256,
            max_queued_messages: 64,
        }
    }
}

impl RuntimeConfig {
    /// Creates the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connection limit
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the fibril limit
    pub fn with_max_fibrils(mut self, max: usize) -> Self {
        self.max_fibrils = max;
        self
    }

    /// Sets the outstanding send limit
    pub fn with_max_outstanding_sends(mut self, max: usize) -> Self {
        self.max_outstanding_sends = max;
        self
    }

    /// Sets the per-connection queue limit
    pub fn with_max_queued_messages(mut self, max: usize) -> Self {
        self.max_queued_messages = max;
        self
    }

    /// Checks every bound is usable
    pub fn validate(&self) -> Result<(), AsyncError> {
        if self.max_fibrils == 0 {
            return Err(AsyncError::InvalidConfig("max_fibrils must be at least 1"));
        }
        if self.max_queued_messages == 0 {
            return Err(AsyncError::InvalidConfig(
                "max_queued_messages must be at least 1",
            ));
        }
        Ok(())
    }
}
