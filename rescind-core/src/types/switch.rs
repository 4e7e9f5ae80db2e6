//! Runtime toggle for the guard-enabled setting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::traits::GuardSwitch;

/// A cloneable, hot-reloadable guard-enabled flag.
///
/// Configuration reloaders hold one clone and call [`set`](Self::set);
/// the guard holds another and polls it.
#[derive(Clone, Debug)]
pub struct GuardToggle {
    enabled: Arc<AtomicBool>,
}

impl GuardToggle {
    /// Creates a toggle with the given initial state.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    /// Updates the flag. Returns the previous value.
    pub fn set(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::AcqRel)
    }

    /// Turns the guard on.
    pub fn enable(&self) {
        self.set(true);
    }

    /// Turns the guard off.
    pub fn disable(&self) {
        self.set(false);
    }
}

impl Default for GuardToggle {
    fn default() -> Self {
        Self::new(true)
    }
}

impl GuardSwitch for GuardToggle {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}
