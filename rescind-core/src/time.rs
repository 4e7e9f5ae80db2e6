//! Clock abstraction and UTC timestamp helpers.
//!
//! The guard never calls `Utc::now()` directly; it reads time from a
//! [`Clock`] so tests and scenario runners can drive it deterministically.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use crate::error::{RescindError, Result};

/// Source of the current UTC time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time from the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying instant.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(start)),
        }
    }

    /// Creates a clock frozen at the Unix epoch.
    pub fn at_epoch() -> Self {
        Self::new(DateTime::UNIX_EPOCH)
    }

    /// Moves the clock to `instant` (may go backwards).
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.write() = instant;
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// Parses an RFC 3339 timestamp, rejecting any non-UTC offset.
///
/// Transports that carry textual timestamps go through here before they
/// reach the guard.
pub fn parse_utc(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw.trim())
        .map_err(|e| RescindError::InvalidTimestamp(format!("{raw}: {e}")))?;

    if parsed.offset().local_minus_utc() != 0 {
        return Err(RescindError::NonUtcTimestamp(raw.to_string()));
    }

    Ok(parsed.with_timezone(&Utc))
}

/// Converts a timestamp into nanoseconds since the epoch.
///
/// Fails for instants outside the years 1677..2262.
pub fn to_nanos(time: DateTime<Utc>) -> Result<i64> {
    time.timestamp_nanos_opt()
        .ok_or_else(|| RescindError::TimestampOutOfRange(time.to_rfc3339()))
}

/// Converts a timestamp into nanoseconds, saturating at the representable bounds.
pub fn to_nanos_saturating(time: DateTime<Utc>) -> i64 {
    match time.timestamp_nanos_opt() {
        Some(nanos) => nanos,
        None if time.timestamp() < 0 => i64::MIN,
        None => i64::MAX,
    }
}

/// Converts nanoseconds since the epoch back into a timestamp.
pub fn from_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

/// Converts a `std::time::Duration` into a chrono duration, saturating.
pub fn chrono_duration(duration: std::time::Duration) -> Duration {
    Duration::from_std(duration).unwrap_or(Duration::MAX)
}
