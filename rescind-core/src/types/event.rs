//! Revoke events and guard mode.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A revoke accepted into the guard.
///
/// Events are appended to the revoke event log in arrival order and stay
/// there until the reclaimer proves nothing in flight can race with them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeEvent {
    /// Application-defined revoke key
    pub key: String,
    /// When the revoke notification was received
    pub received_at: DateTime<Utc>,
}

impl RevokeEvent {
    /// Creates a new event.
    pub fn new(key: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            received_at,
        }
    }
}

/// Operating mode of a guard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardMode {
    /// Calls and revokes are recorded and consulted.
    Active,
    /// Every call is a no-op and all retained state is drained.
    Disabled,
}

impl GuardMode {
    /// Maps the guard-enabled flag to a mode.
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            GuardMode::Active
        } else {
            GuardMode::Disabled
        }
    }

    /// Returns true for [`GuardMode::Active`].
    pub fn is_active(self) -> bool {
        self == GuardMode::Active
    }
}

impl fmt::Display for GuardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardMode::Active => f.write_str("active"),
            GuardMode::Disabled => f.write_str("disabled"),
        }
    }
}
