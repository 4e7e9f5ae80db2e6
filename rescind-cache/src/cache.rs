//! Revocation-aware in-memory TTL cache for RPC results.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use rescind_core::{CompletionFlag, RescindError};
use rescind_guard::RevocationGuard;

/// Cache entry with TTL.
#[derive(Clone)]
struct CacheEntry<V> {
    value: V,
    revoke_key: String,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

/// Cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries
    pub max_entries: usize,
    /// Default TTL in seconds
    pub default_ttl_seconds: u64,
    /// How many times a fetch overtaken by a revoke is re-dispatched
    pub revoked_retries: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl_seconds: 3600,
            revoked_retries: 1,
        }
    }
}

/// Outcome of [`ResultCache::get_or_fetch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fetched<V> {
    /// Served from the cache.
    Hit(V),
    /// Fetched upstream and cached.
    Cached(V),
    /// Every attempt was overtaken by a revoke; nothing was cached or returned.
    Revoked {
        /// Latest revoke time observed for the key
        revoked_at: DateTime<Utc>,
    },
}

impl<V> Fetched<V> {
    /// Returns the value, if one may be served.
    pub fn into_value(self) -> Option<V> {
        match self {
            Fetched::Hit(v) | Fetched::Cached(v) => Some(v),
            Fetched::Revoked { .. } => None,
        }
    }
}

/// Errors from [`ResultCache::get_or_fetch`].
#[derive(Debug, Error)]
pub enum CacheError<E> {
    /// The guard rejected the call registration.
    #[error(transparent)]
    Guard(#[from] RescindError),

    /// The upstream call failed.
    #[error("upstream call failed: {0}")]
    Upstream(E),
}

/// In-memory result cache consulting a [`RevocationGuard`] before every store.
///
/// Each entry is bound to a revoke key; a revoke for that key drops the
/// bound entries via [`invalidate_revoke_key`](Self::invalidate_revoke_key)
/// and keeps in-flight fetches from storing what they return.
pub struct ResultCache<V> {
    guard: Arc<RevocationGuard>,
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    config: CacheConfig,
    discarded_stale: AtomicU64,
}

impl<V: Clone> ResultCache<V> {
    /// Creates a cache with default configuration.
    pub fn new(guard: Arc<RevocationGuard>) -> Self {
        Self::with_config(guard, CacheConfig::default())
    }

    /// Creates a cache with custom configuration.
    pub fn with_config(guard: Arc<RevocationGuard>, config: CacheConfig) -> Self {
        Self {
            guard,
            entries: RwLock::new(HashMap::with_capacity(config.max_entries)),
            config,
            discarded_stale: AtomicU64::new(0),
        }
    }

    /// Gets a cached value by key.
    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read();
        entries.get(key).and_then(|e| {
            if e.is_expired() {
                None
            } else {
                Some(e.value.clone())
            }
        })
    }

    /// Caches a value under `key`, bound to `revoke_key`, with the default TTL.
    ///
    /// This bypasses the guard: use it only for values whose freshness is
    /// known by other means. Fetched values go through
    /// [`get_or_fetch`](Self::get_or_fetch).
    pub fn insert(&self, key: &str, revoke_key: &str, value: V) {
        let ttl = Duration::from_secs(self.config.default_ttl_seconds);
        let mut entries = self.entries.write();
        Self::insert_locked(&mut entries, &self.config, key, revoke_key, value, ttl);
    }

    fn insert_locked(
        entries: &mut HashMap<String, CacheEntry<V>>,
        config: &CacheConfig,
        key: &str,
        revoke_key: &str,
        value: V,
        ttl: Duration,
    ) {
        if entries.len() >= config.max_entries && !entries.contains_key(key) {
            entries.retain(|_, e| !e.is_expired());
        }
        if entries.len() >= config.max_entries && !entries.contains_key(key) {
            if let Some(oldest_key) = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest_key);
            }
        }

        entries.insert(key.to_owned(), CacheEntry {
            value,
            revoke_key: revoke_key.to_owned(),
            inserted_at: Instant::now(),
            ttl,
        });
    }

    /// Returns the cached value or fetches it upstream.
    ///
    /// On a miss the call is registered with the guard, `fetch` is awaited,
    /// and the result is cached only if no revoke of `revoke_key` arrived
    /// after the call was dispatched. An overtaken result is discarded and
    /// the fetch re-dispatched up to `revoked_retries` times.
    #[instrument(skip(self, fetch))]
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &str,
        revoke_key: &str,
        mut fetch: F,
    ) -> std::result::Result<Fetched<V>, CacheError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            debug!(key, "Cache hit");
            return Ok(Fetched::Hit(value));
        }

        let mut attempts = 0;
        loop {
            let completion = CompletionFlag::new();
            // Completion is signalled only after the revoke check below, so
            // the reclaimer cannot forget a revoke this call still has to see.
            let _done = completion.guard();
            let dispatched_at = self.guard.now();
            self.guard.register_outgoing_request(completion.clone(), dispatched_at)?;

            let value = fetch().await.map_err(CacheError::Upstream)?;

            // Check and store under the write lock: a revoke registered after
            // the check is followed by an invalidation that waits for us.
            let revoked = {
                let mut entries = self.entries.write();
                let revoked = self.guard.try_get_recently_revoked_time(revoke_key, dispatched_at);
                if revoked.is_none() {
                    let ttl = Duration::from_secs(self.config.default_ttl_seconds);
                    Self::insert_locked(&mut entries, &self.config, key, revoke_key, value.clone(), ttl);
                }
                revoked
            };

            let Some(revoked_at) = revoked else {
                return Ok(Fetched::Cached(value));
            };
            self.discarded_stale.fetch_add(1, Ordering::Relaxed);
            debug!(key, revoke_key, %dispatched_at, %revoked_at, "Discarded result overtaken by revoke");
            if attempts >= self.config.revoked_retries {
                return Ok(Fetched::Revoked { revoked_at });
            }
            attempts += 1;
        }
    }

    /// Removes every entry bound to `revoke_key`. Returns how many were removed.
    pub fn invalidate_revoke_key(&self, revoke_key: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.revoke_key != revoke_key);
        before - entries.len()
    }

    /// Removes a cached entry.
    pub fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Clears all cached entries.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Removes all expired entries.
    pub fn cleanup_expired(&self) {
        self.entries.write().retain(|_, e| !e.is_expired());
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read();
        let expired = entries.values().filter(|e| e.is_expired()).count();
        CacheStats {
            total_entries: entries.len(),
            expired_entries: expired,
            valid_entries: entries.len().saturating_sub(expired),
            capacity: self.config.max_entries,
            discarded_stale: self.discarded_stale.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics.
#[derive(Clone, Debug, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub valid_entries: usize,
    pub capacity: usize,
    /// Fetched results dropped because a revoke overtook them
    pub discarded_stale: u64,
}
