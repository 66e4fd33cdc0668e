//! Error types for VitalSync operations

use thiserror::Error;

/// Remote datastore errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Permission denied at {path}")]
    PermissionDenied { path: String },

    #[error("Datastore unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Operation on {path} timed out after {elapsed_ms}ms")]
    Timeout { path: String, elapsed_ms: u64 },

    #[error("Connection to {path} lost: {reason}")]
    Disconnected { path: String, reason: String },

    #[error("Malformed data at {path}: {reason}")]
    Malformed { path: String, reason: String },
}

impl StoreError {
    /// Failures that may succeed if the same operation is attempted again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable { .. }
                | StoreError::Timeout { .. }
                | StoreError::Disconnected { .. }
        )
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, StoreError::PermissionDenied { .. })
    }
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No configuration path given (use --config or VITALSYNC_CONFIG)")]
    MissingConfigPath,

    #[error("Failed to read configuration: {0}")]
    Io(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Prediction service errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PredictionError {
    #[error("No prediction service configured")]
    NotConfigured,

    #[error("Prediction request failed: {reason}")]
    Request { reason: String },

    #[error("Prediction service returned status {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("Invalid prediction response: {reason}")]
    InvalidResponse { reason: String },
}

/// Master error type for all VitalSync errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("No authenticated user")]
    Unauthenticated,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Prediction error: {0}")]
    Prediction(#[from] PredictionError),

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },
}

impl SyncError {
    /// Only transient datastore failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Store(err) => err.is_transient(),
            _ => false,
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, SyncError::Store(err) if err.is_permission_denied())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization {
            reason: err.to_string(),
        }
    }
}

/// Result type alias for VitalSync operations.
pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// TESTS
// =============================================================================
