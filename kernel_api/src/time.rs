//! Time abstractions
//!
//! Deadlines in the IPC runtime are absolute [`Instant`]s taken from the
//! kernel clock. In the simulated kernel the clock is virtual and only
//! moves when a wait would otherwise block.

use core::ops::{Add, Sub};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A point on the kernel's monotonic clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Instant {
    /// Nanoseconds since boot
    nanos: u64,
}

impl Instant {
    /// The boot instant
    pub const ZERO: Instant = Instant { nanos: 0 };

    /// Creates an instant from nanoseconds since boot
    pub const fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    /// Returns nanoseconds since boot
    pub const fn as_nanos(&self) -> u64 {
        self.nanos
    }

    /// Returns the duration since another instant (zero if `earlier` is later)
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        Duration::from_nanos(self.nanos.saturating_sub(earlier.nanos))
    }

    /// Returns how long until `deadline`, or `None` if it already passed
    pub fn until(&self, deadline: Instant) -> Option<Duration> {
        if deadline > *self {
            Some(Duration::from_nanos(deadline.nanos - self.nanos))
        } else {
            None
        }
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, duration: Duration) -> Self::Output {
        Instant::from_nanos(self.nanos.saturating_add(duration.as_nanos()))
    }
}

impl Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, duration: Duration) -> Self::Output {
        Instant::from_nanos(self.nanos.saturating_sub(duration.as_nanos()))
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t+{}us", self.nanos / 1_000)
    }
}

/// A span of time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Duration {
    /// Nanoseconds
    nanos: u64,
}

impl Duration {
    /// Zero-length duration
    pub const ZERO: Duration = Duration { nanos: 0 };

    /// Creates a duration from nanoseconds
    pub const fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    /// Creates a duration from microseconds
    pub const fn from_micros(micros: u64) -> Self {
        Self {
            nanos: micros * 1_000,
        }
    }

    /// Creates a duration from milliseconds
    pub const fn from_millis(millis: u64) -> Self {
        Self {
            nanos: millis * 1_000_000,
        }
    }

    /// Creates a duration from seconds
    pub const fn from_secs(secs: u64) -> Self {
        Self {
            nanos: secs * 1_000_000_000,
        }
    }

    /// Returns the duration in nanoseconds
    pub const fn as_nanos(&self) -> u64 {
        self.nanos
    }

    /// Returns the duration in microseconds
    pub const fn as_micros(&self) -> u64 {
        self.nanos / 1_000
    }

    /// Returns the duration in milliseconds
    pub const fn as_millis(&self) -> u64 {
        self.nanos / 1_000_000
    }

    /// Returns true for a zero-length duration
    pub const fn is_zero(&self) -> bool {
        self.nanos == 0
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, other: Duration) -> Self::Output {
        Duration::from_nanos(self.nanos.saturating_add(other.nanos))
    }
}

impl Sub for Duration {
    type Output = Duration;

    fn sub(self, other: Duration) -> Self::Output {
        Duration::from_nanos(self.nanos.saturating_sub(other.nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_units() {
        assert_eq!(Duration::from_millis(1), Duration::from_micros(1_000));
        assert_eq!(Duration::from_secs(1).as_millis(), 1_000);
        assert!(Duration::ZERO.is_zero());
    }

    #[test]
    fn test_instant_arithmetic() {
        let i = Instant::from_nanos(1000);
        let d = Duration::from_nanos(500);

        assert_eq!(i + d, Instant::from_nanos(1500));
        assert_eq!(i - d, Instant::from_nanos(500));
        assert_eq!(Instant::ZERO - d, Instant::ZERO);
    }

    #[test]
    fn test_until_deadline() {
        let now = Instant::from_nanos(1_000);
        assert_eq!(
            now.until(Instant::from_nanos(1_500)),
            Some(Duration::from_nanos(500))
        );
        assert_eq!(now.until(now), None);
        assert_eq!(now.until(Instant::from_nanos(10)), None);
    }

    #[test]
    fn test_duration_since_saturates() {
        let early = Instant::from_nanos(100);
        let late = Instant::from_nanos(300);
        assert_eq!(late.duration_since(early), Duration::from_nanos(200));
        assert_eq!(early.duration_since(late), Duration::ZERO);
    }
}
