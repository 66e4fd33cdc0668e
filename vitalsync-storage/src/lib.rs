//! VitalSync Storage - Synchronization Primitives
//!
//! The building blocks the sync service composes:
//!
//! - [`cache`]: per-user key/value cache with TTL expiry
//! - [`retry`]: bounded exponential-backoff retry over a sleep abstraction
//! - [`registry`]: live-listener handles keyed by (topic, user)
//! - [`remote`]: the seam to the push-capable remote datastore
//! - [`memory`]: an in-process datastore implementing that seam
//! - [`identity`]: current-user lookup
//! - [`clock`]: time source for cache expiry

pub mod cache;
pub mod clock;
pub mod identity;
pub mod memory;
pub mod registry;
pub mod remote;
pub mod retry;

pub use cache::{
    user_cache_key, CacheConfig, CacheEntry, CacheStats, CacheStore, UserScopedKey, DEFAULT_TTL,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use identity::{IdentityProvider, SessionIdentity};
pub use memory::InMemoryRemoteStore;
pub use registry::{CancelHandle, HandleKey, SubscriptionRegistry};
pub use remote::{DataPath, RemoteStore, Snapshot, SnapshotStream};
pub use retry::{with_retry, with_retry_if, RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper};
