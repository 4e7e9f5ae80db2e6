//! Concurrent revoke registry.
//!
//! Maps each revoke key to the latest revoke time seen for it. Each entry
//! carries its own lock; there is no registry-wide lock beyond the map's
//! internal sharding.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use rescind_core::time::from_nanos;

/// Lifecycle of a registry entry, guarded by the entry lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EntryState {
    Live,
    /// Unlinked (or about to be) by the reclaimer; writers must retry.
    Retired,
}

/// Latest revoke time for one key.
///
/// `last_revoke_nanos` is read without the lock for the fast path and only
/// written while holding `lock`, after a re-check.
#[derive(Debug)]
struct RevokeEntry {
    last_revoke_nanos: AtomicI64,
    lock: Mutex<EntryState>,
}

impl RevokeEntry {
    fn new() -> Self {
        Self {
            last_revoke_nanos: AtomicI64::new(i64::MIN),
            lock: Mutex::new(EntryState::Live),
        }
    }

    fn last(&self) -> i64 {
        self.last_revoke_nanos.load(Ordering::Acquire)
    }
}

/// Result of recording a revoke.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The entry moved forward to the new revoke time.
    Advanced,
    /// The revoke was older than or equal to the known one.
    Ignored,
}

/// Concurrent map from revoke key to its latest known revoke time.
///
/// # Thread Safety
///
/// All operations are safe to call concurrently. Lock order is always
/// entry lock, then map shard; no code path holds a shard while waiting
/// for an entry lock.
#[derive(Debug, Default)]
pub struct RevokeRegistry {
    entries: DashMap<String, Arc<RevokeEntry>>,
}

impl RevokeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_create(&self, key: &str) -> Arc<RevokeEntry> {
        if let Some(entry) = self.entries.get(key).map(|e| Arc::clone(e.value())) {
            return entry;
        }
        Arc::clone(
            self.entries
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(RevokeEntry::new()))
                .value(),
        )
    }

    /// Records a revoke for `key` at `received_nanos`.
    ///
    /// Monotonic: the entry only ever moves forward. `on_advance` runs under
    /// the entry lock when the entry moves, so per-key events reach the
    /// event log in the same order as the entry advances.
    pub fn record(&self, key: &str, received_nanos: i64, on_advance: impl FnOnce()) -> RecordOutcome {
        loop {
            let entry = self.get_or_create(key);

            // Fast unsynchronized check: stale and duplicate revokes never lock.
            // If the entry is already retired, its time is below the reclaim
            // cutoff, so an older revoke is equally reclaimable.
            if received_nanos <= entry.last() {
                return RecordOutcome::Ignored;
            }

            let state = entry.lock.lock();
            if *state == EntryState::Retired {
                // Reclaimed between lookup and lock; it is gone from the map now.
                continue;
            }
            if received_nanos <= entry.last() {
                return RecordOutcome::Ignored;
            }
            entry.last_revoke_nanos.store(received_nanos, Ordering::Release);
            on_advance();
            return RecordOutcome::Advanced;
        }
    }

    /// Returns the latest revoke time for `key` if it is strictly after `compare_nanos`.
    pub fn revoked_after(&self, key: &str, compare_nanos: i64) -> Option<DateTime<Utc>> {
        let last = self.entries.get(key).map(|e| e.value().last())?;
        (last > compare_nanos).then(|| from_nanos(last))
    }

    /// Removes the entry for `key` if its revoke time is before `cutoff_nanos`.
    ///
    /// Returns true if the entry was removed. An entry that a newer revoke
    /// has pushed past the cutoff is left alone.
    pub fn reclaim(&self, key: &str, cutoff_nanos: i64) -> bool {
        let Some(entry) = self.entries.get(key).map(|e| Arc::clone(e.value())) else {
            return false;
        };
        if entry.last() >= cutoff_nanos {
            return false;
        }

        let mut state = entry.lock.lock();
        if *state == EntryState::Retired || entry.last() >= cutoff_nanos {
            return false;
        }
        *state = EntryState::Retired;
        self.entries
            .remove_if(key, |_, current| Arc::ptr_eq(current, &entry))
            .is_some()
    }

    /// Retires and removes every entry. Returns the number removed.
    pub fn clear(&self) -> usize {
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        let mut removed = 0;
        for key in keys {
            if self.reclaim(&key, i64::MAX) {
                removed += 1;
            }
        }
        removed
    }

    /// Returns the number of tracked keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
