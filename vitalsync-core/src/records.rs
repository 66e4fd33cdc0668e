//! Records stored under each user's remote paths.
//!
//! Field names follow the remote wire format (camelCase for app records,
//! snake_case for the prediction feature payload).

use crate::error::ValidationError;
use crate::health::{bmi_category, calculate_bmi, BmiCategory};
use crate::identity::{RecordId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

// ============================================================================
// PROFILE
// ============================================================================

/// User profile, stored as a single record at `users/<uid>`.
///
/// A profile written only through partial updates may lack fields; those
/// read back as empty strings and zero measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    /// Weight in kilograms.
    #[serde(default)]
    pub weight: f64,
    /// Height in centimetres.
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub date_of_birth: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
}

impl Profile {
    pub fn bmi(&self) -> f64 {
        calculate_bmi(self.weight, self.height)
    }

    pub fn bmi_category(&self) -> BmiCategory {
        bmi_category(self.bmi())
    }

    /// Merge a partial update into this profile, field by field.
    pub fn apply(&mut self, update: &ProfileUpdate) {
        if let Some(first_name) = &update.first_name {
            self.first_name = first_name.clone();
        }
        if let Some(last_name) = &update.last_name {
            self.last_name = last_name.clone();
        }
        if let Some(email) = &update.email {
            self.email = email.clone();
        }
        if let Some(weight) = update.weight {
            self.weight = weight;
        }
        if let Some(height) = update.height {
            self.height = height;
        }
        if let Some(date_of_birth) = &update.date_of_birth {
            self.date_of_birth = date_of_birth.clone();
        }
        if let Some(gender) = &update.gender {
            self.gender = Some(gender.clone());
        }
        if let Some(age) = update.age {
            self.age = Some(age);
        }
    }
}

/// Partial profile update. Only `Some` fields are sent to the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
}

// ============================================================================
// REMINDERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderType {
    Medication,
    Checkup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    #[serde(default)]
    pub id: RecordId,
    pub title: String,
    /// Time of day, `HH:MM`.
    pub time: String,
    pub days: Vec<String>,
    #[serde(rename = "type")]
    pub reminder_type: ReminderType,
    pub completed: bool,
    pub user_id: UserId,
    pub created_at: Timestamp,
}

/// Caller-supplied fields of a new reminder.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReminder {
    pub title: String,
    pub time: String,
    pub days: Vec<String>,
    pub reminder_type: ReminderType,
    pub completed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<Vec<String>>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub reminder_type: Option<ReminderType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

// ============================================================================
// GLUCOSE READINGS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseReading {
    #[serde(default)]
    pub id: RecordId,
    /// Blood glucose, mg/dL.
    pub value: f64,
    pub timestamp: Timestamp,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewGlucoseReading {
    pub value: f64,
}

impl NewGlucoseReading {
    pub fn validate(&self) -> Result<(), ValidationError> {
        positive_finite("value", self.value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseReadingUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

// ============================================================================
// SAVED MESSAGES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Saved,
    Favorite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedMessage {
    #[serde(default)]
    pub id: RecordId,
    pub message_id: String,
    pub chat_id: String,
    pub content: String,
    pub timestamp: Timestamp,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSavedMessage {
    pub message_id: String,
    pub chat_id: String,
    pub content: String,
    pub timestamp: Timestamp,
    pub message_type: MessageType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedMessageUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
}

// ============================================================================
// PREDICTIONS
// ============================================================================

/// Fixed-shape feature payload accepted by the prediction service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthFeatures {
    pub gender: String,
    pub age: f64,
    pub hypertension: u8,
    pub heart_disease: u8,
    pub smoking_history: String,
    pub bmi: f64,
    pub blood_glucose_level: f64,
}

impl HealthFeatures {
    /// Reject payloads the prediction service cannot score.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.gender.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "gender".to_string(),
            });
        }
        if self.smoking_history.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "smoking_history".to_string(),
            });
        }
        positive_finite("age", self.age)?;
        positive_finite("bmi", self.bmi)?;
        positive_finite("blood_glucose_level", self.blood_glucose_level)?;
        binary_flag("hypertension", self.hypertension)?;
        binary_flag("heart_disease", self.heart_disease)
    }
}

fn positive_finite(field: &str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("must be a positive number, got {value}"),
        })
    }
}

fn binary_flag(field: &str, value: u8) -> Result<(), ValidationError> {
    if value <= 1 {
        Ok(())
    } else {
        Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("must be 0 or 1, got {value}"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Probabilities {
    #[serde(rename = "Non-Diabetic")]
    pub non_diabetic: String,
    #[serde(rename = "Diabetic")]
    pub diabetic: String,
}

/// Response body of the prediction service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutcome {
    pub prediction: String,
    pub confidence: String,
    pub probabilities: Probabilities,
}

/// A stored prediction: the submitted features plus the service's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(default)]
    pub id: RecordId,
    #[serde(rename = "userId")]
    pub user_id: UserId,
    #[serde(flatten)]
    pub features: HealthFeatures,
    pub prediction: String,
    pub confidence: String,
    pub probabilities: Probabilities,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPrediction {
    pub features: HealthFeatures,
    pub outcome: PredictionOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
}

// ============================================================================
// CACHE PAYLOAD
// ============================================================================

/// Typed value held by the cache for one (user, resource) key.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedResource {
    Profile(Profile),
    Reminders(Vec<Reminder>),
    GlucoseReadings(Vec<GlucoseReading>),
    SavedMessages(Vec<SavedMessage>),
    Predictions(Vec<Prediction>),
}

impl CachedResource {
    pub fn into_profile(self) -> Option<Profile> {
        match self {
            CachedResource::Profile(profile) => Some(profile),
            _ => None,
        }
    }
}
