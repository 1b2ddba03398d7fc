// ============================================
// File: crates/quicvc-common/src/time.rs
// ============================================
//! # Time Utilities
//!
//! ## Creation Reason
//! Provides time-related utilities including atomic timestamps for
//! lock-free liveness tracking on connections.
//!
//! ## Main Functionality
//! - `AtomicInstant`: Thread-safe wrapper around `Instant`
//! - `Timestamp`: Unix timestamp in milliseconds carried in frames
//!
//! ## Main Logical Flow
//! 1. Connections store `AtomicInstant` for last inbound activity
//! 2. The liveness task reads it to decide on idle closure
//! 3. Receive loops update it without taking the connection lock
//!
//! ## ⚠️ Important Note for Next Developer
//! - `AtomicInstant` uses `AtomicU64` internally (nanoseconds since start)
//! - Wire timestamps are milliseconds, matching `VC_INIT` and `HEARTBEAT`
//!
//! ## Last Modified
//! v0.1.0 - Initial time utilities

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ============================================
// Constants
// ============================================

/// Maximum acceptable clock skew between peers for handshake timestamps.
pub const MAX_CLOCK_SKEW_MS: u64 = 5 * 60 * 1000;

// ============================================
// AtomicInstant
// ============================================

/// Thread-safe wrapper around [`Instant`] for concurrent access.
///
/// # Implementation
/// Stores nanoseconds elapsed since a reference instant (program start).
/// Uses `AtomicU64` with relaxed ordering for performance.
///
/// # Example
/// ```
/// use quicvc_common::time::AtomicInstant;
/// use std::time::Duration;
///
/// let atomic = AtomicInstant::now();
/// atomic.touch();
/// assert!(!atomic.has_elapsed(Duration::from_secs(1)));
/// ```
#[derive(Debug)]
pub struct AtomicInstant {
    /// Nanoseconds since the reference instant
    nanos: AtomicU64,
}

impl AtomicInstant {
    /// Reference instant (lazily initialized at program start).
    fn reference() -> Instant {
        use std::sync::OnceLock;
        static REFERENCE: OnceLock<Instant> = OnceLock::new();
        *REFERENCE.get_or_init(Instant::now)
    }

    fn nanos_since_reference(instant: Instant) -> u64 {
        instant
            .checked_duration_since(Self::reference())
            .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }

    /// Creates a new `AtomicInstant` set to the current time.
    #[must_use]
    pub fn now() -> Self {
        Self::from_instant(Instant::now())
    }

    /// Creates a new `AtomicInstant` from an `Instant`.
    #[must_use]
    pub fn from_instant(instant: Instant) -> Self {
        Self {
            nanos: AtomicU64::new(Self::nanos_since_reference(instant)),
        }
    }

    /// Loads the stored instant.
    #[must_use]
    pub fn load(&self) -> Instant {
        let nanos = self.nanos.load(Ordering::Relaxed);
        Self::reference() + Duration::from_nanos(nanos)
    }

    fn store(&self, instant: Instant) {
        self.nanos
            .store(Self::nanos_since_reference(instant), Ordering::Relaxed);
    }

    /// Updates to the current time and returns the previous value.
    pub fn touch(&self) -> Instant {
        let old = self.load();
        self.store(Instant::now());
        old
    }

    /// Returns the elapsed time since the stored instant.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.load().elapsed()
    }

    /// Checks if more than `duration` has elapsed since the stored instant.
    #[must_use]
    pub fn has_elapsed(&self, duration: Duration) -> bool {
        self.elapsed() > duration
    }
}

impl Default for AtomicInstant {
    fn default() -> Self {
        Self::now()
    }
}

// ============================================
// Timestamp
// ============================================

/// Unix timestamp in milliseconds.
///
/// Carried in `VC_INIT` and `HEARTBEAT` frames.
///
/// # Example
/// ```
/// use quicvc_common::time::Timestamp;
///
/// let now = Timestamp::now();
/// assert!(now.is_recent(1_000));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a new timestamp from Unix milliseconds.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Creates a timestamp for the current time.
    #[must_use]
    pub fn now() -> Self {
        Self(unix_timestamp_millis())
    }

    /// Returns the Unix timestamp in milliseconds.
    #[must_use]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Checks if the timestamp is within `max_skew_ms` of now, in either direction.
    #[must_use]
    pub fn is_recent(&self, max_skew_ms: u64) -> bool {
        self.offset_from_now().unsigned_abs() <= max_skew_ms
    }

    /// Returns the difference from the current time in milliseconds.
    ///
    /// Positive values mean the timestamp is in the future. Saturates for
    /// timestamps far outside the representable range.
    #[must_use]
    pub fn offset_from_now(&self) -> i64 {
        self.0.saturating_sub(unix_timestamp_millis())
    }

    /// Milliseconds elapsed since this timestamp, saturating.
    #[must_use]
    pub fn elapsed_millis(&self) -> i64 {
        unix_timestamp_millis().saturating_sub(self.0)
    }
}

impl From<i64> for Timestamp {
    fn from(millis: i64) -> Self {
        Self(millis)
    }
}

impl From<Timestamp> for i64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

// ============================================
// Utility Functions
// ============================================

/// Returns the current Unix timestamp in milliseconds.
///
/// A clock set before the epoch reads as zero.
#[must_use]
pub fn unix_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_atomic_instant_basic() {
        let atomic = AtomicInstant::now();
        assert!(atomic.load().elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_atomic_instant_touch() {
        let atomic = AtomicInstant::now();
        thread::sleep(Duration::from_millis(10));

        let before = atomic.touch();
        let after = atomic.load();
        assert!(after > before);
        assert!(atomic.elapsed() < Duration::from_millis(10));
    }

    #[test]
    fn test_atomic_instant_elapsed() {
        let atomic = AtomicInstant::now();
        thread::sleep(Duration::from_millis(10));

        assert!(atomic.elapsed() >= Duration::from_millis(10));
        assert!(atomic.has_elapsed(Duration::from_millis(5)));
    }

    #[test]
    fn test_timestamp_recency() {
        assert!(Timestamp::now().is_recent(1_000));

        let old = Timestamp::from_millis(Timestamp::now().as_millis() - 60_000);
        assert!(!old.is_recent(30_000));
        assert!(old.offset_from_now() < 0);
    }

    #[test]
    fn test_timestamp_extremes_are_not_recent() {
        let ancient = Timestamp::from_millis(i64::MIN);
        assert!(!ancient.is_recent(MAX_CLOCK_SKEW_MS));
        assert_eq!(ancient.offset_from_now(), i64::MIN);
        assert_eq!(ancient.elapsed_millis(), i64::MAX);

        let distant = Timestamp::from_millis(i64::MAX);
        assert!(!distant.is_recent(MAX_CLOCK_SKEW_MS));
        assert!(distant.elapsed_millis() < 0);
    }

    #[test]
    fn test_timestamp_serializes_as_number() {
        let ts = Timestamp::from_millis(1_700_000_000_000);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "1700000000000");
    }
}
