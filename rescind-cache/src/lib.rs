//! # rescind cache
//!
//! A result cache that consults the revocation guard before every store,
//! plus the subscriber that feeds revoke notifications into both.
//!
//! A fetch registers its call with the guard, awaits the upstream result,
//! and caches it only when no revoke of its key arrived after dispatch.
//! The subscriber registers each revoke before invalidating cached entries,
//! so an in-flight fetch either sees the revoke or is invalidated after it
//! stores.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod cache;
mod subscriber;

pub use cache::{CacheConfig, CacheError, CacheStats, Fetched, ResultCache};
pub use subscriber::{RevokeNotice, RevokeSubscriber, SubscriberSummary, WireNotice};
