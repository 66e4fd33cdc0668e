//! Per-user cache with time-to-live expiry.
//!
//! Keys are [`UserScopedKey`]s, which cannot be built without naming the
//! owning user, so one user's reads never observe another user's entries.
//! Entries expire lazily on lookup; [`CacheStore::purge_expired`] sweeps them
//! eagerly.

pub mod key;
pub mod store;

pub use key::{user_cache_key, UserScopedKey};
pub use store::{CacheConfig, CacheEntry, CacheStats, CacheStore, DEFAULT_TTL};
