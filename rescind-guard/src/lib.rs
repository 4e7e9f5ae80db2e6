//! # rescind guard
//!
//! The revocation race guard for client-side RPC result caches.
//!
//! A revoke notification can arrive while the call whose result it
//! invalidates is still in flight. The guard records when calls are
//! dispatched and when revokes arrive, so the cache can ask, right before
//! publishing a fetched value, whether its key was revoked after the call
//! left. A background reclaimer forgets revokes once no pending call can
//! still race with them.
//!
//! ## Components
//!
//! - [`RevokeRegistry`]: key → latest revoke time, one lock per entry
//! - [`OutgoingLedger`]: FIFO of in-flight calls and their dispatch times
//! - [`RevokeEventLog`]: FIFO of accepted revokes awaiting reclamation
//! - [`RevocationGuard`]: the API, plus the reclaimer lifecycle
//!
//! ## Example
//!
//! ```rust,ignore
//! use rescind_core::{CompletionFlag, GuardToggle, SystemClock};
//! use rescind_guard::{GuardConfig, RevocationGuard};
//!
//! let guard = RevocationGuard::spawn(GuardConfig::default(), GuardToggle::new(true), SystemClock)?;
//!
//! let call = CompletionFlag::new();
//! // Completes on drop, after the revoke check below.
//! let _done = call.guard();
//! let dispatched_at = guard.now();
//! guard.register_outgoing_request(call.clone(), dispatched_at)?;
//! let value = fetch().await;
//!
//! if guard.try_get_recently_revoked_time("orders/42", dispatched_at).is_none() {
//!     cache.insert("orders/42", value);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod config;
mod guard;
mod metrics;
mod queue;
mod reclaimer;
mod registry;

pub use config::GuardConfig;
pub use guard::RevocationGuard;
pub use metrics::GuardMetrics;
pub use queue::{OutgoingLedger, OutgoingRecord, RevokeEventLog, SweepQueue};
pub use registry::{RecordOutcome, RevokeRegistry};
