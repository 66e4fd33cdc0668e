//! VitalSync Sync - Client-Side Data Access
//!
//! [`SyncService`] sits between application views and a push-capable remote
//! datastore. It serves reads from a per-user cache, keeps that cache current
//! from live pushes, and retries writes through transient failures.
//!
//! ```ignore
//! let service = SyncService::builder(store, identity)
//!     .with_config(&SyncConfig::load()?)?
//!     .build();
//!
//! let mut reminders = service.subscribe_to_reminders();
//! while let Some(list) = reminders.recv().await {
//!     render(&list);
//! }
//! ```

pub mod collection;
pub mod config;
pub mod notifications;
pub mod prediction;
pub mod service;
pub mod subscription;
pub mod telemetry;

pub use collection::{message_view, UserCollection};
pub use config::{
    CacheSection, LoggingConfig, NotificationConfig, PredictionConfig, RetryConfig, SyncConfig,
    CONFIG_ENV_VAR,
};
pub use notifications::{Notification, NotificationKind, NotificationLevel, Notifier};
pub use prediction::{HttpPredictionClient, PredictionClient};
pub use service::{SyncService, SyncServiceBuilder};
pub use subscription::Subscription;
pub use telemetry::{env_filter, init_tracing};
