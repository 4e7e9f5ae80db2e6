//! The revocation race guard and its public API.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, instrument};

use rescind_core::error::{RescindError, Result};
use rescind_core::time::{chrono_duration, to_nanos, to_nanos_saturating};
use rescind_core::{CallHandle, Clock, GuardMode, GuardStats, GuardSwitch, RevokeEvent, SweepReport};

use crate::config::GuardConfig;
use crate::metrics::GuardMetrics;
use crate::queue::{OutgoingLedger, OutgoingRecord, RevokeEventLog};
use crate::reclaimer::Reclaimer;
use crate::registry::{RecordOutcome, RevokeRegistry};

/// State shared between the guard handle and its reclaimer task.
pub(crate) struct GuardCore {
    pub(crate) config: GuardConfig,
    pub(crate) switch: Arc<dyn GuardSwitch>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) registry: RevokeRegistry,
    pub(crate) outgoing: OutgoingLedger,
    pub(crate) events: RevokeEventLog,
    pub(crate) metrics: GuardMetrics,
    /// Mode seen by the previous sweep, for transition logging.
    pub(crate) last_mode: Mutex<GuardMode>,
    /// Whether the previous sweep cut off at the retention ceiling.
    pub(crate) ceiling_engaged: AtomicBool,
    /// Held for the duration of a sweep.
    pub(crate) sweep_lock: Mutex<()>,
}

impl GuardCore {
    pub(crate) fn mode(&self) -> GuardMode {
        GuardMode::from_enabled(self.switch.is_enabled())
    }

    fn register_outgoing_request(&self, handle: Arc<dyn CallHandle>, dispatched_at: DateTime<Utc>) -> Result<()> {
        if !self.mode().is_active() {
            return Ok(());
        }

        let now = self.clock.now();
        let earliest = now
            .checked_sub_signed(chrono_duration(self.config.dispatch_window()))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        if dispatched_at < earliest || dispatched_at > now {
            return Err(RescindError::DispatchTimeOutOfWindow {
                time: dispatched_at,
                earliest,
                latest: now,
            });
        }

        self.outgoing.push(OutgoingRecord { handle, dispatched_at });
        GuardMetrics::incr(&self.metrics.outgoing_registered);
        Ok(())
    }

    fn register_revoke_key(&self, key: &str, received_at: DateTime<Utc>) -> Result<()> {
        if !self.mode().is_active() {
            return Ok(());
        }
        if key.is_empty() {
            return Err(RescindError::EmptyRevokeKey);
        }

        let latest = self
            .clock
            .now()
            .checked_add_signed(chrono_duration(self.config.revoke_skew()))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if received_at > latest {
            return Err(RescindError::ReceiveTimeTooFarAhead {
                time: received_at,
                latest,
            });
        }
        let received_nanos = match to_nanos(received_at) {
            Ok(nanos) => nanos,
            // Older than any admissible dispatch time: no call can race it.
            Err(_) if received_at < DateTime::UNIX_EPOCH => {
                GuardMetrics::incr(&self.metrics.revokes_ignored);
                debug!(key, %received_at, "Ignored revoke older than the nanosecond range");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let outcome = self.registry.record(key, received_nanos, || {
            self.events.push(RevokeEvent::new(key, received_at));
        });
        match outcome {
            RecordOutcome::Advanced => {
                GuardMetrics::incr(&self.metrics.revokes_registered);
                debug!(key, %received_at, "Revoke registered");
            }
            RecordOutcome::Ignored => GuardMetrics::incr(&self.metrics.revokes_ignored),
        }
        Ok(())
    }

    fn try_get_recently_revoked_time(&self, key: &str, compare_time: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.mode().is_active() {
            return None;
        }
        self.registry.revoked_after(key, to_nanos_saturating(compare_time))
    }

    fn stats(&self) -> GuardStats {
        let m = &self.metrics;
        GuardStats {
            registry_entries: self.registry.len(),
            revoke_queue_depth: self.events.len(),
            outgoing_ledger_depth: self.outgoing.len(),
            revokes_registered: GuardMetrics::read(&m.revokes_registered),
            revokes_ignored: GuardMetrics::read(&m.revokes_ignored),
            outgoing_registered: GuardMetrics::read(&m.outgoing_registered),
            entries_reclaimed: GuardMetrics::read(&m.entries_reclaimed),
            events_drained: GuardMetrics::read(&m.events_drained),
            sweeps: GuardMetrics::read(&m.sweeps),
            sweep_errors: GuardMetrics::read(&m.sweep_errors),
            full_drains: GuardMetrics::read(&m.full_drains),
        }
    }
}

/// Revocation race guard.
///
/// Records outgoing-call dispatch times and revoke times, and answers
/// "was this key revoked after time T?" so a cache never publishes a value
/// that a revoke overtook while the call producing it was in flight.
///
/// One guard per cache scope. Share it by reference (`Arc`) between the
/// value cache and the revoke subscriber.
///
/// # Lifecycle
///
/// [`spawn`](Self::spawn) starts the background reclaimer on the current
/// Tokio runtime. [`shutdown`](Self::shutdown) stops and joins it; dropping
/// the guard stops it without joining. Guards built with [`new`](Self::new)
/// have no reclaimer and are swept by calling [`sweep`](Self::sweep).
pub struct RevocationGuard {
    core: Arc<GuardCore>,
    reclaimer: Mutex<Option<Reclaimer>>,
}

impl RevocationGuard {
    /// Creates a guard without a background reclaimer.
    pub fn new(
        config: GuardConfig,
        switch: impl GuardSwitch + 'static,
        clock: impl Clock + 'static,
    ) -> Result<Self> {
        config.validate()?;
        let initial_mode = GuardMode::from_enabled(switch.is_enabled());

        Ok(Self {
            core: Arc::new(GuardCore {
                config,
                switch: Arc::new(switch),
                clock: Arc::new(clock),
                registry: RevokeRegistry::new(),
                outgoing: OutgoingLedger::new(),
                events: RevokeEventLog::new(),
                metrics: GuardMetrics::new(),
                last_mode: Mutex::new(initial_mode),
                ceiling_engaged: AtomicBool::new(false),
                sweep_lock: Mutex::new(()),
            }),
            reclaimer: Mutex::new(None),
        })
    }

    /// Creates a guard and starts its reclaimer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        config: GuardConfig,
        switch: impl GuardSwitch + 'static,
        clock: impl Clock + 'static,
    ) -> Result<Self> {
        let guard = Self::new(config, switch, clock)?;
        guard.start_reclaimer();
        Ok(guard)
    }

    /// Starts the reclaimer if it is not running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_reclaimer(&self) {
        let mut slot = self.reclaimer.lock();
        if slot.is_none() {
            *slot = Some(Reclaimer::spawn(Arc::clone(&self.core)));
        }
    }

    /// Returns true while a reclaimer task is attached and has not exited.
    pub fn is_reclaimer_running(&self) -> bool {
        self.reclaimer
            .lock()
            .as_ref()
            .map(|r| !r.is_finished())
            .unwrap_or(false)
    }

    /// Stops the reclaimer and waits for it to exit.
    ///
    /// Retained state is not flushed. Safe to call more than once.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let reclaimer = self.reclaimer.lock().take();
        if let Some(reclaimer) = reclaimer {
            reclaimer.stop().await;
            info!("Revocation guard shut down");
        }
    }

    /// Records an outgoing call dispatched at `dispatched_at`.
    ///
    /// Call this when the upstream request is sent, for every call whose
    /// result may later be cached under a revocable key. No-op while the
    /// guard is disabled.
    ///
    /// # Errors
    ///
    /// [`RescindError::DispatchTimeOutOfWindow`] if `dispatched_at` is in the
    /// future or older than the dispatch window.
    pub fn register_outgoing_request<H>(&self, handle: H, dispatched_at: DateTime<Utc>) -> Result<()>
    where
        H: CallHandle + 'static,
    {
        self.core.register_outgoing_request(Arc::new(handle), dispatched_at)
    }

    /// Records a revoke of `key` received at `received_at`.
    ///
    /// Stale and duplicate revokes are ignored, as are receive times before
    /// 1677, which no dispatch window can reach. No-op while the guard is
    /// disabled.
    ///
    /// # Errors
    ///
    /// [`RescindError::EmptyRevokeKey`] for an empty key, and
    /// [`RescindError::ReceiveTimeTooFarAhead`] if `received_at` exceeds the
    /// clock-skew tolerance.
    pub fn register_revoke_key(&self, key: &str, received_at: DateTime<Utc>) -> Result<()> {
        self.core.register_revoke_key(key, received_at)
    }

    /// Returns the last revoke time of `key` if it is strictly after `compare_time`.
    ///
    /// Pass the dispatch time of the call that produced a candidate value.
    /// `Some` means the value is stale and must be neither cached nor served.
    /// Always `None` while the guard is disabled.
    pub fn try_get_recently_revoked_time(&self, key: &str, compare_time: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.core.try_get_recently_revoked_time(key, compare_time)
    }

    /// Runs one reclaimer tick on the calling thread.
    ///
    /// Waits for a tick already running on the background reclaimer.
    pub fn sweep(&self) -> Result<SweepReport> {
        self.core.sweep()
    }

    /// Returns current gauges and counters.
    pub fn stats(&self) -> GuardStats {
        self.core.stats()
    }

    /// Returns the current time on the guard's clock.
    ///
    /// Collaborators take dispatch and receive times from here so they
    /// agree with the guard's validation windows.
    pub fn now(&self) -> DateTime<Utc> {
        self.core.clock.now()
    }

    /// Returns the mode derived from the guard switch right now.
    pub fn mode(&self) -> GuardMode {
        self.core.mode()
    }

    /// Returns the guard configuration.
    pub fn config(&self) -> &GuardConfig {
        &self.core.config
    }

    #[cfg(test)]
    pub(crate) fn core_for_tests(&self) -> &GuardCore {
        &self.core
    }
}

impl std::fmt::Debug for RevocationGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationGuard")
            .field("mode", &self.mode())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rescind_core::{CompletionFlag, GuardToggle, ManualClock};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::UNIX_EPOCH + Duration::seconds(secs)
    }

    fn guard() -> (RevocationGuard, GuardToggle, ManualClock) {
        let clock = ManualClock::new(at(1_000));
        let toggle = GuardToggle::new(true);
        let guard = RevocationGuard::new(GuardConfig::default(), toggle.clone(), clock.clone()).unwrap();
        (guard, toggle, clock)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = GuardConfig {
            sweep_interval_ms: 0,
            ..Default::default()
        };
        let err = RevocationGuard::new(config, GuardToggle::new(true), ManualClock::at_epoch()).unwrap_err();
        assert!(matches!(err, RescindError::ConfigError(_)));
    }

    #[test]
    fn test_dispatch_window() {
        let (guard, _, _) = guard();
        guard.register_outgoing_request(CompletionFlag::new(), at(1_000)).unwrap();
        guard.register_outgoing_request(CompletionFlag::new(), at(700)).unwrap();

        let too_old = guard.register_outgoing_request(CompletionFlag::new(), at(699)).unwrap_err();
        assert!(matches!(too_old, RescindError::DispatchTimeOutOfWindow { .. }));
        assert!(too_old.is_contract_violation());

        let future = guard.register_outgoing_request(CompletionFlag::new(), at(1_001)).unwrap_err();
        assert!(matches!(future, RescindError::DispatchTimeOutOfWindow { .. }));

        assert_eq!(guard.stats().outgoing_ledger_depth, 2);
        assert_eq!(guard.stats().outgoing_registered, 2);
    }

    #[test]
    fn test_revoke_validation() {
        let (guard, _, _) = guard();
        assert!(matches!(
            guard.register_revoke_key("", at(1_000)),
            Err(RescindError::EmptyRevokeKey)
        ));
        guard.register_revoke_key("k", at(1_300)).unwrap();
        assert!(matches!(
            guard.register_revoke_key("k", at(1_301)),
            Err(RescindError::ReceiveTimeTooFarAhead { .. })
        ));
        // No lower bound on receive times.
        guard.register_revoke_key("old", at(-86_400)).unwrap();
        assert_eq!(guard.stats().registry_entries, 2);
    }

    #[test]
    fn test_race_protection() {
        let (guard, _, clock) = guard();
        let call = CompletionFlag::new();
        guard.register_outgoing_request(call.clone(), at(1_000)).unwrap();
        clock.set(at(1_001));
        guard.register_revoke_key("orders/42", at(1_001)).unwrap();

        assert_eq!(guard.try_get_recently_revoked_time("orders/42", at(1_000)), Some(at(1_001)));
        assert_eq!(guard.try_get_recently_revoked_time("orders/42", at(1_001)), None);
        assert_eq!(guard.try_get_recently_revoked_time("orders/7", at(0)), None);
    }

    #[test]
    fn test_stale_and_duplicate_revokes_counted() {
        let (guard, _, _) = guard();
        guard.register_revoke_key("k", at(995)).unwrap();
        guard.register_revoke_key("k", at(995)).unwrap();
        guard.register_revoke_key("k", at(993)).unwrap();

        let stats = guard.stats();
        assert_eq!(stats.revokes_registered, 1);
        assert_eq!(stats.revokes_ignored, 2);
        assert_eq!(stats.revoke_queue_depth, 1);
        assert_eq!(guard.try_get_recently_revoked_time("k", at(0)), Some(at(995)));
    }

    #[test]
    fn test_disabled_guard_is_inert() {
        let (guard, toggle, _) = guard();
        guard.register_revoke_key("k", at(1_000)).unwrap();
        toggle.disable();

        assert_eq!(guard.mode(), GuardMode::Disabled);
        assert_eq!(guard.try_get_recently_revoked_time("k", at(0)), None);

        // Contract checks are skipped too: every call is a no-op.
        guard.register_revoke_key("", at(1_000)).unwrap();
        guard.register_outgoing_request(CompletionFlag::new(), at(0)).unwrap();
        assert_eq!(guard.stats().outgoing_ledger_depth, 0);

        toggle.enable();
        assert_eq!(guard.try_get_recently_revoked_time("k", at(0)), Some(at(1_000)));
    }

    #[test]
    fn test_revoke_before_nanos_range_is_ignored() {
        let (guard, _, _) = guard();
        guard.register_revoke_key("k", DateTime::<Utc>::MIN_UTC).unwrap();
        guard.register_revoke_key("k", at(-9_300_000_000)).unwrap();

        let stats = guard.stats();
        assert_eq!(stats.revokes_ignored, 2);
        assert_eq!(stats.registry_entries, 0);
        assert_eq!(stats.revoke_queue_depth, 0);
        assert_eq!(guard.try_get_recently_revoked_time("k", at(700)), None);
    }

    #[test]
    fn test_compare_time_far_outside_nanos_range() {
        let (guard, _, _) = guard();
        guard.register_revoke_key("k", at(1_000)).unwrap();
        assert_eq!(
            guard.try_get_recently_revoked_time("k", DateTime::<Utc>::MIN_UTC),
            Some(at(1_000))
        );
        assert_eq!(guard.try_get_recently_revoked_time("k", DateTime::<Utc>::MAX_UTC), None);
    }

    #[test]
    fn test_debug_does_not_panic() {
        let (guard, _, _) = guard();
        assert!(format!("{guard:?}").contains("RevocationGuard"));
    }
}
