//! Revocation bus subscriber: feeds revoke notifications into the guard.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use rescind_core::error::Result;
use rescind_core::time::parse_utc;
use rescind_guard::RevocationGuard;

use crate::cache::ResultCache;

/// A revoke notification as delivered by the transport.
#[derive(Debug)]
pub struct RevokeNotice {
    /// Revoke key
    pub key: String,
    /// When this node received the notification
    pub received_at: DateTime<Utc>,
    /// Signalled once the revoke is registered
    pub ack: Option<oneshot::Sender<()>>,
}

impl RevokeNotice {
    /// Creates a notice without acknowledgement.
    pub fn new(key: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            received_at,
            ack: None,
        }
    }

    /// Creates a notice and the receiver its acknowledgement arrives on.
    pub fn with_ack(key: impl Into<String>, received_at: DateTime<Utc>) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let notice = Self {
            key: key.into(),
            received_at,
            ack: Some(tx),
        };
        (notice, rx)
    }

    /// Builds a notice from a wire payload carrying an RFC 3339 timestamp.
    ///
    /// Non-UTC timestamps are rejected.
    pub fn from_wire(payload: &WireNotice) -> Result<Self> {
        Ok(Self::new(payload.key.clone(), parse_utc(&payload.received_at)?))
    }
}

/// JSON shape of a revoke notification on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireNotice {
    /// Revoke key
    pub key: String,
    /// RFC 3339 receive timestamp, must be UTC
    pub received_at: String,
}

/// Counts reported when a subscriber stops.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriberSummary {
    /// Notices registered with the guard
    pub registered: u64,
    /// Notices rejected as contract violations
    pub rejected: u64,
    /// Cache entries invalidated
    pub invalidated: u64,
}

/// Applies revoke notifications to a guard and, optionally, a result cache.
pub struct RevokeSubscriber<V> {
    guard: Arc<RevocationGuard>,
    cache: Option<Arc<ResultCache<V>>>,
}

impl<V: Clone> RevokeSubscriber<V> {
    /// Creates a subscriber for `guard`, invalidating `cache` when given.
    pub fn new(guard: Arc<RevocationGuard>, cache: Option<Arc<ResultCache<V>>>) -> Self {
        Self { guard, cache }
    }

    /// Registers one notice, then invalidates bound cache entries, then acks.
    ///
    /// Returns how many cache entries were invalidated.
    pub fn apply(&self, notice: RevokeNotice) -> Result<usize> {
        self.guard.register_revoke_key(&notice.key, notice.received_at)?;
        let invalidated = self
            .cache
            .as_ref()
            .map(|cache| cache.invalidate_revoke_key(&notice.key))
            .unwrap_or(0);

        debug!(key = %notice.key, invalidated, "Applied revoke notice");
        if let Some(ack) = notice.ack {
            let _ = ack.send(());
        }
        Ok(invalidated)
    }

    /// Consumes notices until the channel closes or shutdown is signalled.
    ///
    /// Contract violations are logged and dropped: they indicate a
    /// transport-side bug and retrying would not help.
    pub async fn run(
        self,
        mut notices: mpsc::Receiver<RevokeNotice>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> SubscriberSummary {
        let mut summary = SubscriberSummary::default();
        info!("Revoke subscriber started");

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }

                notice = notices.recv() => {
                    let Some(notice) = notice else { break };
                    let key = notice.key.clone();
                    match self.apply(notice) {
                        Ok(invalidated) => {
                            summary.registered += 1;
                            summary.invalidated += invalidated as u64;
                        }
                        Err(e) => {
                            summary.rejected += 1;
                            warn!(key = %key, error = %e, "Dropped malformed revoke notice");
                        }
                    }
                }
            }
        }

        info!(
            registered = summary.registered,
            rejected = summary.rejected,
            invalidated = summary.invalidated,
            "Revoke subscriber stopped"
        );
        summary
    }
}
