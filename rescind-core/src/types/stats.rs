//! Observability snapshots for a guard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::GuardMode;

/// Point-in-time guard statistics.
///
/// The three depth gauges are read without a global lock, so under
/// concurrent traffic they may be mutually inconsistent by a few items.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardStats {
    /// Revoke keys currently tracked in the registry
    pub registry_entries: usize,
    /// Revoke events awaiting reclamation
    pub revoke_queue_depth: usize,
    /// Outgoing calls not yet observed complete by the reclaimer
    pub outgoing_ledger_depth: usize,
    /// Revokes that advanced an entry
    pub revokes_registered: u64,
    /// Stale or duplicate revokes that were ignored
    pub revokes_ignored: u64,
    /// Outgoing calls registered
    pub outgoing_registered: u64,
    /// Registry entries removed by the reclaimer
    pub entries_reclaimed: u64,
    /// Revoke events drained by the reclaimer
    pub events_drained: u64,
    /// Reclaimer ticks completed
    pub sweeps: u64,
    /// Reclaimer ticks that failed
    pub sweep_errors: u64,
    /// Full drains triggered by the disabled mode
    pub full_drains: u64,
}

impl GuardStats {
    /// Total items retained across the registry and both queues.
    pub fn retained(&self) -> usize {
        self.registry_entries + self.revoke_queue_depth + self.outgoing_ledger_depth
    }
}

/// Outcome of a single reclaimer tick.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Mode observed at the start of the tick
    pub mode: GuardMode,
    /// Safe watermark used for the tick (absent when disabled)
    pub watermark: Option<DateTime<Utc>>,
    /// Cutoff actually applied: the later of the watermark and the retention ceiling
    pub cutoff: Option<DateTime<Utc>>,
    /// Completed outgoing calls removed from the ledger
    pub outgoing_completed: usize,
    /// Revoke events removed from the event log
    pub events_drained: usize,
    /// Registry entries removed
    pub entries_reclaimed: usize,
}

impl SweepReport {
    /// Report for a tick that ran in disabled mode.
    pub fn drained(outgoing: usize, events: usize, entries: usize) -> Self {
        Self {
            mode: GuardMode::Disabled,
            watermark: None,
            cutoff: None,
            outgoing_completed: outgoing,
            events_drained: events,
            entries_reclaimed: entries,
        }
    }

    /// Returns true when the tick removed anything.
    pub fn reclaimed_anything(&self) -> bool {
        self.outgoing_completed + self.events_drained + self.entries_reclaimed > 0
    }
}
