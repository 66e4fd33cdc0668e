//! Tracing subscriber initialization.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vitalsync_core::ConfigError;

use crate::config::LoggingConfig;

/// Build the filter: `RUST_LOG` when set, otherwise the configured directive.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|err| ConfigError::InvalidValue {
            field: "logging.filter".to_string(),
            value: config.filter.clone(),
            reason: err.to_string(),
        }),
    }
}

/// Install the global tracing subscriber. Call once at startup.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|err| ConfigError::InvalidValue {
        field: "logging".to_string(),
        value: if config.json { "json" } else { "plain" }.to_string(),
        reason: format!("failed to install subscriber: {err}"),
    })?;

    tracing::info!(filter = %config.filter, json = config.json, "tracing initialized");
    Ok(())
}
