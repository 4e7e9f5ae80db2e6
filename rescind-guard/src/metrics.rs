//! Lifetime counters for a guard.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the guard API and the reclaimer.
///
/// Combined with the depth gauges into a
/// [`GuardStats`](rescind_core::GuardStats) snapshot by
/// [`RevocationGuard::stats`](crate::RevocationGuard::stats).
#[derive(Debug, Default)]
pub struct GuardMetrics {
    /// Revokes that advanced a registry entry
    pub revokes_registered: AtomicU64,
    /// Stale or duplicate revokes
    pub revokes_ignored: AtomicU64,
    /// Outgoing calls recorded
    pub outgoing_registered: AtomicU64,
    /// Registry entries removed by the reclaimer
    pub entries_reclaimed: AtomicU64,
    /// Revoke events drained by the reclaimer
    pub events_drained: AtomicU64,
    /// Completed reclaimer ticks
    pub sweeps: AtomicU64,
    /// Failed reclaimer ticks
    pub sweep_errors: AtomicU64,
    /// Disabled-mode drains that removed something
    pub full_drains: AtomicU64,
}

impl GuardMetrics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
