//! Core types for the BeaconKit SDK
//!
//! This module defines the fundamental types used throughout the SDK,
//! using newtype patterns for semantic validation and type safety.

use core::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Beacon Key
// ----------------------------------------------------------------------------

/// Identifies one session's beacon instance.
///
/// `beacon_id` is a process-unique session number handed out by the session
/// registry; `beacon_seq` distinguishes beacon instances when a session is
/// split. Keys are never reused after removal within one process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BeaconKey {
    beacon_id: u32,
    beacon_seq: u32,
}

impl BeaconKey {
    /// Create a new beacon key
    pub fn new(beacon_id: u32, beacon_seq: u32) -> Self {
        Self {
            beacon_id,
            beacon_seq,
        }
    }

    /// Session number this key belongs to
    pub fn beacon_id(&self) -> u32 {
        self.beacon_id
    }

    /// Beacon sequence number within the session
    pub fn beacon_seq(&self) -> u32 {
        self.beacon_seq
    }
}

impl fmt::Display for BeaconKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.beacon_id, self.beacon_seq)
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since the Unix epoch
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: i64) -> Self {
        Self(millis)
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> i64 {
        self.0
    }

    /// Timestamp shifted backwards by `millis`, saturating at the epoch floor
    pub fn saturating_sub_millis(&self, millis: i64) -> Self {
        Self(self.0.saturating_sub(millis))
    }
}

// ----------------------------------------------------------------------------
// Record
// ----------------------------------------------------------------------------

/// Fixed per-record accounting overhead in bytes.
///
/// Cache byte accounting charges each record its serialized length plus this
/// constant, covering the queue slot and timestamp bookkeeping.
pub const RECORD_SIZE_OVERHEAD: usize = 24;

/// An immutable telemetry record: a capture timestamp plus a pre-encoded
/// ampersand-joined key/value fragment.
///
/// The payload is produced by the instrumentation surface and is transmitted
/// verbatim; the cache never inspects it beyond its length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    timestamp: Timestamp,
    data: String,
}

impl Record {
    /// Create a new record
    pub fn new(timestamp: Timestamp, data: impl Into<String>) -> Self {
        Self {
            timestamp,
            data: data.into(),
        }
    }

    /// Capture timestamp of this record
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// The pre-encoded payload fragment
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Accounted size of this record in bytes
    pub fn size_bytes(&self) -> usize {
        self.data.len() + RECORD_SIZE_OVERHEAD
    }
}

// ----------------------------------------------------------------------------
// Time Source
// ----------------------------------------------------------------------------

/// Trait for providing timestamps, injectable for tests.
///
/// Implementations supply both a wall clock (for record timestamps and
/// age-based eviction) and a monotonic clock (for interval measurement, never
/// compared against wall-clock values).
pub trait TimeSource: Send + Sync {
    /// Current wall-clock time in milliseconds since the Unix epoch
    fn now(&self) -> Timestamp;

    /// Milliseconds on a monotonic clock with an arbitrary epoch
    fn monotonic_millis(&self) -> u64;
}

/// Standard library implementation of [`TimeSource`]
#[derive(Debug, Clone)]
pub struct SystemTimeSource {
    started: Instant,
}

impl SystemTimeSource {
    /// Create a time source anchored at the current instant
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp::new(duration.as_millis() as i64)
    }

    fn monotonic_millis(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beacon_key_equality_uses_both_fields() {
        let a = BeaconKey::new(1, 0);
        let b = BeaconKey::new(1, 1);
        let c = BeaconKey::new(1, 0);

        assert_ne!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.to_string(), "1:0");
    }

    #[test]
    fn test_record_size_includes_overhead() {
        let record = Record::new(Timestamp::new(10), "et=1&na=click");
        assert_eq!(record.size_bytes(), 13 + RECORD_SIZE_OVERHEAD);
    }

    #[test]
    fn test_timestamp_saturating_sub() {
        let ts = Timestamp::new(500);
        assert_eq!(ts.saturating_sub_millis(200).as_millis(), 300);
        assert_eq!(
            Timestamp::new(i64::MIN).saturating_sub_millis(1).as_millis(),
            i64::MIN
        );
    }

    #[test]
    fn test_system_time_source_is_monotonic() {
        let source = SystemTimeSource::new();
        let a = source.monotonic_millis();
        let b = source.monotonic_millis();
        assert!(b >= a);
        assert!(source.now().as_millis() > 0);
    }
}
