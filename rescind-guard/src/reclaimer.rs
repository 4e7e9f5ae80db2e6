//! Background reclamation of revokes that can no longer race.
//!
//! A revoke is safe to forget once every call dispatched before it has
//! completed: any call still pending was dispatched after the revoke, so a
//! lookup with its dispatch time would not match anyway. The reclaimer
//! derives that point in time (the safe watermark) from the earliest
//! dispatch time still in the outgoing ledger and prunes the event log and
//! registry up to it.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use rescind_core::error::{RescindError, Result};
use rescind_core::time::{chrono_duration, to_nanos_saturating};
use rescind_core::{GuardMode, SweepReport};

use crate::guard::GuardCore;
use crate::metrics::GuardMetrics;

impl GuardCore {
    /// One reclaimer tick.
    ///
    /// Ticks are serialized: the ledger and event log have a single consumer.
    pub(crate) fn sweep(&self) -> Result<SweepReport> {
        let _consumer = self.sweep_lock.lock();
        let mode = self.mode();
        self.observe_mode(mode);

        let report = match mode {
            GuardMode::Disabled => self.drain(),
            GuardMode::Active => self.reclaim()?,
        };
        GuardMetrics::incr(&self.metrics.sweeps);
        Ok(report)
    }

    fn observe_mode(&self, mode: GuardMode) {
        let mut last = self.last_mode.lock();
        if *last != mode {
            info!(from = %*last, to = %mode, "Revocation guard mode changed");
            *last = mode;
        }
    }

    /// Logs when the retention ceiling starts or stops overriding the watermark.
    fn observe_ceiling(&self, engaged: bool, watermark: DateTime<Utc>, ceiling: DateTime<Utc>) {
        let was_engaged = self.ceiling_engaged.swap(engaged, Ordering::Relaxed);
        match (was_engaged, engaged) {
            (false, true) => {
                warn!(%watermark, %ceiling, "Outgoing ledger stalled, applying retention ceiling")
            }
            (true, false) => info!(%watermark, "Outgoing ledger moving again, retention ceiling released"),
            _ => {}
        }
    }

    /// Drops every piece of retained state.
    fn drain(&self) -> SweepReport {
        let outgoing = self.outgoing.drain_all();
        let events = self.events.drain_all();
        let entries = self.registry.clear();

        if outgoing + events + entries > 0 {
            GuardMetrics::incr(&self.metrics.full_drains);
            GuardMetrics::add(&self.metrics.events_drained, events);
            GuardMetrics::add(&self.metrics.entries_reclaimed, entries);
            info!(outgoing, events, entries, "Guard disabled, drained retained state");
        }
        SweepReport::drained(outgoing, events, entries)
    }

    /// Pops completed calls off the ledger head and derives the safe watermark.
    ///
    /// The watermark is the earliest dispatch time left in the ledger, or
    /// `now - idle lag` when the ledger is empty, capped by the dispatch time
    /// of any call completed during this tick. Registration order is not
    /// dispatch order, so the whole ledger is scanned, not just its head.
    fn safe_watermark(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, usize)> {
        let mut completed = 0;
        let mut oldest_completed: Option<DateTime<Utc>> = None;
        while let Some(record) = self.outgoing.pop_front_if(|r| r.handle.is_completed()) {
            completed += 1;
            oldest_completed = Some(match oldest_completed {
                Some(t) => t.min(record.dispatched_at),
                None => record.dispatched_at,
            });
        }

        let bound = match self.outgoing.min_with(|r| r.dispatched_at) {
            Some(pending) => pending,
            None => now
                .checked_sub_signed(chrono_duration(self.config.idle_watermark_lag()))
                .ok_or_else(|| {
                    RescindError::SweepFailed(format!("idle watermark underflows at {now}"))
                })?,
        };

        let watermark = match oldest_completed {
            Some(t) => t.min(bound),
            None => bound,
        };
        Ok((watermark, completed))
    }

    fn reclaim(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let (watermark, outgoing_completed) = self.safe_watermark(now)?;

        let ceiling = now
            .checked_sub_signed(chrono_duration(self.config.retention_ceiling()))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.observe_ceiling(ceiling > watermark, watermark, ceiling);
        let cutoff = watermark.max(ceiling);
        let cutoff_nanos = to_nanos_saturating(cutoff);

        let mut events_drained = 0;
        let mut entries_reclaimed = 0;
        while let Some(event) = self.events.pop_front_if(|e| e.received_at < cutoff) {
            events_drained += 1;
            if self.registry.reclaim(&event.key, cutoff_nanos) {
                entries_reclaimed += 1;
            }
        }

        GuardMetrics::add(&self.metrics.events_drained, events_drained);
        GuardMetrics::add(&self.metrics.entries_reclaimed, entries_reclaimed);

        let report = SweepReport {
            mode: GuardMode::Active,
            watermark: Some(watermark),
            cutoff: Some(cutoff),
            outgoing_completed,
            events_drained,
            entries_reclaimed,
        };
        if report.reclaimed_anything() {
            debug!(
                %watermark,
                outgoing_completed,
                events_drained,
                entries_reclaimed,
                "Sweep reclaimed state"
            );
        }
        Ok(report)
    }

    /// A sweep that never unwinds into the caller.
    fn tick(&self) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.sweep())) {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                GuardMetrics::incr(&self.metrics.sweep_errors);
                error!(error = %e, "Reclaimer sweep failed");
            }
            Err(payload) => {
                GuardMetrics::incr(&self.metrics.sweep_errors);
                error!(panic = panic_message(payload.as_ref()), "Reclaimer sweep panicked");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

/// Handle to a running reclaimer task.
///
/// Dropping the handle closes the shutdown channel, which the task treats
/// as a stop signal.
pub(crate) struct Reclaimer {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Reclaimer {
    pub(crate) fn spawn(core: Arc<GuardCore>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(core, shutdown_rx));
        Self { shutdown_tx, task }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub(crate) async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Reclaimer task did not exit cleanly");
        }
    }
}

async fn run(core: Arc<GuardCore>, mut shutdown_rx: watch::Receiver<bool>) {
    let period = core.config.sweep_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval_ms = period.as_millis() as u64, "Reclaimer started");

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => core.tick(),
        }
    }

    info!("Reclaimer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rescind_core::{CallHandle, CompletionFlag, GuardToggle, ManualClock};

    use crate::{GuardConfig, RevocationGuard};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::UNIX_EPOCH + Duration::seconds(secs)
    }

    fn guard_at(clock: &ManualClock) -> (RevocationGuard, GuardToggle) {
        let toggle = GuardToggle::new(true);
        let guard = RevocationGuard::new(GuardConfig::default(), toggle.clone(), clock.clone()).unwrap();
        (guard, toggle)
    }

    struct PanickingHandle;

    impl CallHandle for PanickingHandle {
        fn is_completed(&self) -> bool {
            panic!("handle exploded");
        }
    }

    #[test]
    fn test_idle_watermark_lags_now() {
        let clock = ManualClock::new(at(100));
        let (guard, _) = guard_at(&clock);
        let report = guard.sweep().unwrap();
        assert_eq!(report.watermark, Some(at(99)));
        assert_eq!(report.mode, GuardMode::Active);
    }

    #[test]
    fn test_pending_call_holds_watermark() {
        let clock = ManualClock::new(at(100));
        let (guard, _) = guard_at(&clock);
        let call = CompletionFlag::new();
        guard.register_outgoing_request(call.clone(), at(100)).unwrap();

        clock.set(at(101));
        guard.register_revoke_key("orders/42", at(101)).unwrap();

        clock.set(at(200));
        let report = guard.sweep().unwrap();
        assert_eq!(report.watermark, Some(at(100)));
        assert_eq!(report.events_drained, 0);
        assert_eq!(guard.try_get_recently_revoked_time("orders/42", at(100)), Some(at(101)));
    }

    #[test]
    fn test_completed_call_caps_watermark_for_one_tick() {
        let clock = ManualClock::new(at(100));
        let (guard, _) = guard_at(&clock);
        let call = CompletionFlag::new();
        guard.register_outgoing_request(call.clone(), at(100)).unwrap();
        clock.set(at(101));
        guard.register_revoke_key("k", at(101)).unwrap();

        call.complete();
        clock.set(at(110));
        let first = guard.sweep().unwrap();
        assert_eq!(first.outgoing_completed, 1);
        assert_eq!(first.watermark, Some(at(100)));
        assert_eq!(first.entries_reclaimed, 0);

        let second = guard.sweep().unwrap();
        assert_eq!(second.watermark, Some(at(109)));
        assert_eq!(second.entries_reclaimed, 1);
        assert_eq!(guard.stats().registry_entries, 0);
    }

    #[test]
    fn test_ledger_stops_at_first_pending_call() {
        let clock = ManualClock::new(at(100));
        let (guard, _) = guard_at(&clock);
        let slow = CompletionFlag::new();
        let fast = CompletionFlag::new();
        guard.register_outgoing_request(slow.clone(), at(100)).unwrap();
        guard.register_outgoing_request(fast.clone(), at(100)).unwrap();
        fast.complete();

        let report = guard.sweep().unwrap();
        assert_eq!(report.outgoing_completed, 0);
        assert_eq!(guard.stats().outgoing_ledger_depth, 2);

        slow.complete();
        let report = guard.sweep().unwrap();
        assert_eq!(report.outgoing_completed, 2);
        assert_eq!(guard.stats().outgoing_ledger_depth, 0);
    }

    #[test]
    fn test_earlier_dispatch_behind_head_holds_watermark() {
        let clock = ManualClock::new(at(110));
        let (guard, _) = guard_at(&clock);
        let late = CompletionFlag::new();
        let early = CompletionFlag::new();
        guard.register_outgoing_request(late.clone(), at(100)).unwrap();
        guard.register_outgoing_request(early.clone(), at(50)).unwrap();
        guard.register_revoke_key("orders/42", at(70)).unwrap();

        let report = guard.sweep().unwrap();
        assert_eq!(report.watermark, Some(at(50)));
        assert_eq!(report.entries_reclaimed, 0);
        assert_eq!(guard.try_get_recently_revoked_time("orders/42", at(50)), Some(at(70)));

        // Completed but still queued behind the head: it keeps counting.
        early.complete();
        let report = guard.sweep().unwrap();
        assert_eq!(report.watermark, Some(at(50)));
        assert_eq!(guard.try_get_recently_revoked_time("orders/42", at(50)), Some(at(70)));

        late.complete();
        let report = guard.sweep().unwrap();
        assert_eq!(report.outgoing_completed, 2);
        assert_eq!(report.watermark, Some(at(50)));
        let report = guard.sweep().unwrap();
        assert_eq!(report.watermark, Some(at(109)));
        assert_eq!(report.entries_reclaimed, 1);
    }

    #[test]
    fn test_newer_revoke_keeps_entry_until_its_own_event() {
        let clock = ManualClock::new(at(100));
        let (guard, _) = guard_at(&clock);
        let call = CompletionFlag::new();
        guard.register_revoke_key("k", at(100)).unwrap();
        clock.set(at(104));
        guard.register_outgoing_request(call.clone(), at(102)).unwrap();
        guard.register_revoke_key("k", at(104)).unwrap();

        // Watermark is 102: the first event drains but the entry is at 104.
        let report = guard.sweep().unwrap();
        assert_eq!(report.events_drained, 1);
        assert_eq!(report.entries_reclaimed, 0);
        assert_eq!(guard.try_get_recently_revoked_time("k", at(102)), Some(at(104)));

        call.complete();
        clock.set(at(200));
        guard.sweep().unwrap();
        let report = guard.sweep().unwrap();
        assert_eq!(report.entries_reclaimed, 1);
        assert_eq!(guard.stats().retained(), 0);
    }

    #[test]
    fn test_retention_ceiling_reclaims_despite_stalled_ledger() {
        let clock = ManualClock::new(at(0));
        let (guard, _) = guard_at(&clock);
        let stuck = CompletionFlag::new();
        guard.register_outgoing_request(stuck, at(0)).unwrap();
        clock.set(at(10));
        guard.register_revoke_key("k", at(10)).unwrap();

        clock.set(at(3_000));
        assert_eq!(guard.sweep().unwrap().entries_reclaimed, 0);

        clock.set(at(3_611));
        let report = guard.sweep().unwrap();
        assert_eq!(report.cutoff, Some(at(11)));
        assert_eq!(report.entries_reclaimed, 1);
        assert_eq!(guard.stats().registry_entries, 0);
        assert_eq!(guard.stats().outgoing_ledger_depth, 1);
    }

    #[test]
    fn test_ceiling_state_tracked_across_sweeps() {
        let clock = ManualClock::new(at(0));
        let (guard, _) = guard_at(&clock);
        let engaged = || guard.core_for_tests().ceiling_engaged.load(Ordering::Relaxed);
        let stuck = CompletionFlag::new();
        guard.register_outgoing_request(stuck.clone(), at(0)).unwrap();

        clock.set(at(3_000));
        guard.sweep().unwrap();
        assert!(!engaged());

        clock.set(at(3_611));
        guard.sweep().unwrap();
        assert!(engaged());
        guard.sweep().unwrap();
        assert!(engaged());

        stuck.complete();
        guard.sweep().unwrap();
        guard.sweep().unwrap();
        assert!(!engaged());
    }

    #[test]
    fn test_manual_sweep_waits_for_running_tick() {
        let clock = ManualClock::new(at(100));
        let (guard, _) = guard_at(&clock);
        let guard = Arc::new(guard);

        let running = guard.core_for_tests().sweep_lock.lock();
        let sweeper = {
            let guard = Arc::clone(&guard);
            std::thread::spawn(move || guard.sweep().unwrap())
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(guard.stats().sweeps, 0);

        drop(running);
        sweeper.join().unwrap();
        assert_eq!(guard.stats().sweeps, 1);
    }

    #[test]
    fn test_disabled_sweep_drains_everything() {
        let clock = ManualClock::new(at(100));
        let (guard, toggle) = guard_at(&clock);
        guard.register_outgoing_request(CompletionFlag::new(), at(100)).unwrap();
        guard.register_revoke_key("a", at(100)).unwrap();
        guard.register_revoke_key("b", at(100)).unwrap();

        toggle.disable();
        let report = guard.sweep().unwrap();
        assert_eq!(report, SweepReport::drained(1, 2, 2));
        assert_eq!(guard.stats().retained(), 0);
        assert_eq!(guard.stats().full_drains, 1);

        // Nothing left: a second disabled sweep is not counted as a drain.
        guard.sweep().unwrap();
        assert_eq!(guard.stats().full_drains, 1);
    }

    #[test]
    fn test_tick_contains_panics() {
        let clock = ManualClock::new(at(100));
        let (guard, _) = guard_at(&clock);
        guard.register_outgoing_request(PanickingHandle, at(100)).unwrap();

        guard.core_for_tests().tick();
        guard.core_for_tests().tick();
        assert_eq!(guard.stats().sweep_errors, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_sweeps_on_interval() {
        let clock = ManualClock::new(at(100));
        let toggle = GuardToggle::new(true);
        let guard = RevocationGuard::spawn(GuardConfig::default(), toggle, clock.clone()).unwrap();
        guard.register_revoke_key("k", at(100)).unwrap();
        clock.set(at(200));

        tokio::time::sleep(std::time::Duration::from_millis(1_500)).await;
        assert_eq!(guard.stats().registry_entries, 0);
        assert!(guard.stats().sweeps >= 1);

        guard.shutdown().await;
        assert!(!guard.is_reclaimer_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_sleep() {
        let config = GuardConfig::default().with_sweep_interval(std::time::Duration::from_secs(30));
        let guard = RevocationGuard::spawn(config, GuardToggle::new(true), ManualClock::at_epoch()).unwrap();
        assert!(guard.is_reclaimer_running());

        let started = Instant::now();
        guard.shutdown().await;
        assert!(started.elapsed() < std::time::Duration::from_secs(30));
        assert_eq!(guard.stats().sweeps, 0);
        // Idempotent.
        guard.shutdown().await;
    }
}
