//! VitalSync Core - Record Types
//!
//! Data structures shared by every VitalSync crate: identifiers, the resource
//! classes the sync layer manages, the records stored under each user's paths,
//! the error taxonomy, and the pure health math derived from profiles.
//!
//! This crate performs no I/O.

pub mod error;
pub mod health;
pub mod identity;
pub mod records;
pub mod resource;

pub use error::{
    ConfigError, PredictionError, StoreError, SyncError, SyncResult, ValidationError,
};
pub use health::{bmi_category, calculate_bmi, BmiCategory};
pub use identity::{new_record_id, RecordId, Timestamp, UserId};
pub use records::{
    CachedResource, GlucoseReading, GlucoseReadingUpdate, HealthFeatures, MessageType,
    NewGlucoseReading, NewPrediction, NewReminder, NewSavedMessage, Prediction,
    PredictionOutcome, PredictionUpdate, Probabilities, Profile, ProfileUpdate, Reminder,
    ReminderType, ReminderUpdate, SavedMessage, SavedMessageUpdate,
};
pub use resource::ResourceKind;
