//! Common traits for rescind.
//!
//! These are the two capabilities the guard needs from the outside world:
//! asking whether an outgoing call has finished, and asking whether the
//! guard is switched on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ═══════════════════════════════════════════════════════════════════════════════
// CALL HANDLE
// ═══════════════════════════════════════════════════════════════════════════════

/// An in-flight outgoing call, as seen by the guard.
///
/// The guard only ever asks whether the call has finished; it never awaits,
/// cancels, or inspects the result. Any future, task or promise type can be
/// adapted by implementing this trait.
pub trait CallHandle: Send + Sync {
    /// Returns true once the call has finished (successfully or not).
    fn is_completed(&self) -> bool;
}

impl<T: Send + 'static> CallHandle for tokio::task::JoinHandle<T> {
    fn is_completed(&self) -> bool {
        self.is_finished()
    }
}

impl CallHandle for AtomicBool {
    fn is_completed(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

impl<H: CallHandle + ?Sized> CallHandle for Arc<H> {
    fn is_completed(&self) -> bool {
        (**self).is_completed()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GUARD SWITCH
// ═══════════════════════════════════════════════════════════════════════════════

/// Polled, hot-reloadable "guard enabled" setting.
///
/// Read on every guard call and on every reclaimer tick; implementations
/// must be cheap and must not block.
pub trait GuardSwitch: Send + Sync {
    /// Returns true when the guard should be active.
    fn is_enabled(&self) -> bool;
}

impl GuardSwitch for AtomicBool {
    fn is_enabled(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

impl GuardSwitch for tokio::sync::watch::Receiver<bool> {
    fn is_enabled(&self) -> bool {
        *self.borrow()
    }
}

impl<S: GuardSwitch + ?Sized> GuardSwitch for Arc<S> {
    fn is_enabled(&self) -> bool {
        (**self).is_enabled()
    }
}
