//! Configuration loading for the sync service.
//!
//! Every section is optional; omitted fields take the documented defaults.
//! Unknown fields are rejected.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use vitalsync_core::ConfigError;
use vitalsync_storage::{CacheConfig, RetryPolicy};

pub const CONFIG_ENV_VAR: &str = "VITALSYNC_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub retry: RetryConfig,
    pub cache: CacheSection,
    pub notifications: NotificationConfig,
    pub prediction: Option<PredictionConfig>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            base_delay_ms: u64::try_from(policy.base_delay.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSection {
    pub ttl_ms: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_ms: u64::try_from(CacheConfig::default().ttl.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotificationConfig {
    /// Buffered notifications per receiver before the oldest are dropped.
    pub capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PredictionConfig {
    pub endpoint: String,
    #[serde(default = "default_prediction_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_prediction_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "vitalsync=info,info".to_string(),
            json: false,
        }
    }
}

impl SyncConfig {
    /// Load from `--config <path>` or `VITALSYNC_CONFIG`, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Io(format!("{}: {}", path.display(), err)))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig =
            toml::from_str(contents).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.base_delay_ms == 0 && self.retry.max_retries > 0 {
            return Err(invalid(
                "retry.base_delay_ms",
                self.retry.base_delay_ms,
                "must be > 0 when retries are enabled",
            ));
        }
        if self.cache.ttl_ms == 0 {
            return Err(invalid("cache.ttl_ms", self.cache.ttl_ms, "must be > 0"));
        }
        if self.notifications.capacity == 0 {
            return Err(invalid(
                "notifications.capacity",
                self.notifications.capacity,
                "must be > 0",
            ));
        }
        if let Some(prediction) = &self.prediction {
            let endpoint = prediction.endpoint.trim();
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(invalid(
                    "prediction.endpoint",
                    &prediction.endpoint,
                    "must be an http(s) URL",
                ));
            }
            if prediction.timeout_ms == 0 {
                return Err(invalid(
                    "prediction.timeout_ms",
                    prediction.timeout_ms,
                    "must be > 0",
                ));
            }
        }
        if self.logging.filter.trim().is_empty() {
            return Err(invalid("logging.filter", "", "must not be empty"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            Duration::from_millis(self.retry.base_delay_ms),
        )
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new().with_ttl(Duration::from_millis(self.cache.ttl_ms))
    }
}

impl PredictionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
