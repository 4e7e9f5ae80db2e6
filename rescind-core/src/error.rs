//! Error types for rescind.
//!
//! Contract violations are caller bugs: they surface synchronously and are
//! never retried. Everything else comes from the background reclaimer or
//! from configuration loading.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias using `RescindError`.
pub type Result<T> = std::result::Result<T, RescindError>;

/// Main error type for all rescind operations.
#[derive(Debug, Error)]
pub enum RescindError {
    // ═══════════════════════════════════════════════════════════════════════════
    // CONTRACT VIOLATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// A revoke key was empty.
    #[error("Revoke key must not be empty")]
    EmptyRevokeKey,

    /// A dispatch time fell outside the accepted window.
    #[error("Dispatch time {time} outside accepted window [{earliest}, {latest}]")]
    DispatchTimeOutOfWindow {
        time: DateTime<Utc>,
        earliest: DateTime<Utc>,
        latest: DateTime<Utc>,
    },

    /// A revoke receive time lay too far in the future.
    #[error("Revoke receive time {time} is later than {latest}")]
    ReceiveTimeTooFarAhead {
        time: DateTime<Utc>,
        latest: DateTime<Utc>,
    },

    /// A textual timestamp carried a non-UTC offset.
    #[error("Timestamp is not UTC: {0}")]
    NonUtcTimestamp(String),

    /// A textual timestamp was not valid RFC 3339.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// A timestamp lies outside the representable nanosecond range.
    #[error("Timestamp out of range: {0}")]
    TimestampOutOfRange(String),

    // ═══════════════════════════════════════════════════════════════════════════
    // CONFIGURATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    // ═══════════════════════════════════════════════════════════════════════════
    // INTERNAL ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// A reclaimer tick failed.
    #[error("Sweep failed: {0}")]
    SweepFailed(String),
}

impl RescindError {
    /// Returns true if this error reports malformed caller input.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            RescindError::EmptyRevokeKey
                | RescindError::DispatchTimeOutOfWindow { .. }
                | RescindError::ReceiveTimeTooFarAhead { .. }
                | RescindError::NonUtcTimestamp(_)
                | RescindError::InvalidTimestamp(_)
                | RescindError::TimestampOutOfRange(_)
        )
    }

    /// Returns true if retrying the same operation may succeed.
    ///
    /// Only background sweeps qualify; the reclaimer retries them on the
    /// next tick.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RescindError::SweepFailed(_))
    }
}
