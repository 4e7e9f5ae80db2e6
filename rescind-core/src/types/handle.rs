//! A cloneable completion flag usable as a [`CallHandle`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::traits::CallHandle;

/// Shared "this call has finished" flag.
///
/// Register one clone with the guard and keep another next to the call;
/// flip it with [`complete`](Self::complete) once the call returns, or use
/// [`guard`](Self::guard) to flip it automatically when the call's scope
/// ends, including on early return and panic.
#[derive(Clone, Debug, Default)]
pub struct CompletionFlag {
    done: Arc<AtomicBool>,
}

impl CompletionFlag {
    /// Creates a flag in the pending state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the call as finished.
    pub fn complete(&self) {
        self.done.store(true, Ordering::Release);
    }

    /// Returns a guard that marks the call finished when dropped.
    pub fn guard(&self) -> CompletionGuard {
        CompletionGuard { flag: self.clone() }
    }
}

impl CallHandle for CompletionFlag {
    fn is_completed(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// Completes its [`CompletionFlag`] on drop.
#[derive(Debug)]
#[must_use = "dropping the guard immediately completes the call"]
pub struct CompletionGuard {
    flag: CompletionFlag,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.flag.complete();
    }
}
