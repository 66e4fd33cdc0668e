//! In-memory TTL cache keyed by [`UserScopedKey`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::trace;
use vitalsync_core::{CachedResource, Timestamp, UserId};

use super::key::UserScopedKey;
use crate::clock::{Clock, SystemClock};

/// Default time-to-live for cached entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Configuration for the cache store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Entries older than this are treated as absent.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl: DEFAULT_TTL }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// A cached value and the time it was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub key: UserScopedKey,
    pub value: V,
    pub inserted_at: Timestamp,
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Number of entries currently held, expired or not.
    pub entry_count: u64,
    /// Entries dropped because they outlived the TTL.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct CacheInner<V> {
    entries: HashMap<UserScopedKey, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Key to value store with lazy TTL expiry.
///
/// Clones share the same entries. Every operation is total: expired and
/// missing entries look the same to callers.
pub struct CacheStore<V = CachedResource> {
    inner: Arc<Mutex<CacheInner<V>>>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
}

impl<V> Clone for CacheStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            clock: Arc::clone(&self.clock),
            ttl: self.ttl,
        }
    }
}

impl<V> std::fmt::Debug for CacheStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl<V: Clone> Default for CacheStore<V> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl<V: Clone> CacheStore<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
            })),
            clock,
            ttl: chrono::Duration::from_std(config.ttl).unwrap_or(chrono::Duration::MAX),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl.to_std().unwrap_or(Duration::MAX)
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &CacheEntry<V>, now: Timestamp) -> bool {
        now.signed_duration_since(entry.inserted_at) > self.ttl
    }

    /// Value for `key` if present and unexpired. Expired entries are evicted.
    pub fn get(&self, key: &UserScopedKey) -> Option<V> {
        let now = self.clock.now();
        let mut guard = self.lock();
        let inner = &mut *guard;
        let expired = match inner.entries.get(key) {
            Some(entry) if !self.is_expired(entry, now) => {
                inner.hits += 1;
                trace!(key = %key.encode(), "cache hit");
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.entries.remove(key);
            inner.evictions += 1;
        }
        inner.misses += 1;
        trace!(key = %key.encode(), expired, "cache miss");
        None
    }

    /// Store `value` under `key` with a fresh insertion time.
    pub fn set(&self, key: UserScopedKey, value: V) {
        let inserted_at = self.clock.now();
        let mut inner = self.lock();
        inner.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                value,
                inserted_at,
            },
        );
    }

    /// Remove `key`. Returns whether an entry was present.
    pub fn invalidate(&self, key: &UserScopedKey) -> bool {
        let removed = self.lock().entries.remove(key).is_some();
        if removed {
            trace!(key = %key.encode(), "cache invalidated");
        }
        removed
    }

    /// Remove every entry owned by `user_id`. Returns the number removed.
    pub fn invalidate_user(&self, user_id: &UserId) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !key.belongs_to(user_id));
        before - inner.entries.len()
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        let before = inner.entries.len();
        let ttl = self.ttl;
        inner
            .entries
            .retain(|_, entry| now.signed_duration_since(entry.inserted_at) <= ttl);
        let purged = before - inner.entries.len();
        inner.evictions += purged as u64;
        purged
    }

    /// The raw entry for `key`, without expiry checks or stat updates.
    pub fn entry(&self, key: &UserScopedKey) -> Option<CacheEntry<V>> {
        self.lock().entries.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entry_count: inner.entries.len() as u64,
            evictions: inner.evictions,
        }
    }
}
