//! VitalSync Test Utilities
//!
//! Shared test infrastructure for the VitalSync workspace:
//! - Proptest generators for ids and records
//! - Store wrappers that inject failures or count calls
//! - A scripted prediction client
//! - Fixtures and assertions

pub use vitalsync_core::{
    GlucoseReading, HealthFeatures, MessageType, NewGlucoseReading, NewPrediction, NewReminder,
    NewSavedMessage, PredictionError, PredictionOutcome, Probabilities, Profile, RecordId,
    Reminder, ReminderType, SavedMessage, StoreError, SyncError, SyncResult, Timestamp, UserId,
};
pub use vitalsync_storage::{
    DataPath, InMemoryRemoteStore, ManualClock, RecordingSleeper, RemoteStore, RetryPolicy,
    SessionIdentity, Snapshot, SnapshotStream,
};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use vitalsync_sync::PredictionClient;

// ============================================================================
// STORE WRAPPERS
// ============================================================================

/// Wraps a store and fails scripted one-shot operations.
///
/// Each call to `read_once`, `set`, `update` or `remove` pops the next
/// scripted error, if any, instead of reaching the inner store. Listening
/// and key allocation always pass through.
pub struct FlakyStore<S> {
    inner: S,
    failures: Mutex<VecDeque<StoreError>>,
    attempts: AtomicUsize,
}

impl<S: RemoteStore> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failures: Mutex::new(VecDeque::new()),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` operations with `err`.
    pub fn fail_next(&self, count: usize, err: StoreError) -> &Self {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        failures.extend(std::iter::repeat(err).take(count));
        self
    }

    /// Operations attempted so far, failed or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn pending_failures(&self) -> usize {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn next_failure(&self) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<S: RemoteStore> RemoteStore for FlakyStore<S> {
    async fn read_once(&self, path: &DataPath) -> Result<Snapshot, StoreError> {
        self.next_failure()?;
        self.inner.read_once(path).await
    }

    fn listen(&self, path: &DataPath) -> SnapshotStream {
        self.inner.listen(path)
    }

    fn allocate_key(&self, path: &DataPath) -> RecordId {
        self.inner.allocate_key(path)
    }

    async fn set(&self, path: &DataPath, value: Value) -> Result<(), StoreError> {
        self.next_failure()?;
        self.inner.set(path, value).await
    }

    async fn update(&self, path: &DataPath, fields: Value) -> Result<(), StoreError> {
        self.next_failure()?;
        self.inner.update(path, fields).await
    }

    async fn remove(&self, path: &DataPath) -> Result<(), StoreError> {
        self.next_failure()?;
        self.inner.remove(path).await
    }
}

/// Call counters kept by [`CountingStore`].
#[derive(Debug, Default)]
pub struct StoreCalls {
    pub reads: AtomicUsize,
    pub listens: AtomicUsize,
    pub allocations: AtomicUsize,
    pub writes: AtomicUsize,
}

impl StoreCalls {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn listens(&self) -> usize {
        self.listens.load(Ordering::SeqCst)
    }

    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

/// Wraps a store and counts calls by kind.
pub struct CountingStore<S> {
    inner: S,
    calls: Arc<StoreCalls>,
}

impl<S: RemoteStore> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: Arc::new(StoreCalls::default()),
        }
    }

    /// Shared counters, readable after the store is moved into a service.
    pub fn calls(&self) -> Arc<StoreCalls> {
        Arc::clone(&self.calls)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: RemoteStore> RemoteStore for CountingStore<S> {
    async fn read_once(&self, path: &DataPath) -> Result<Snapshot, StoreError> {
        self.calls.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_once(path).await
    }

    fn listen(&self, path: &DataPath) -> SnapshotStream {
        self.calls.listens.fetch_add(1, Ordering::SeqCst);
        self.inner.listen(path)
    }

    fn allocate_key(&self, path: &DataPath) -> RecordId {
        self.calls.allocations.fetch_add(1, Ordering::SeqCst);
        self.inner.allocate_key(path)
    }

    async fn set(&self, path: &DataPath, value: Value) -> Result<(), StoreError> {
        self.calls.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set(path, value).await
    }

    async fn update(&self, path: &DataPath, fields: Value) -> Result<(), StoreError> {
        self.calls.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.update(path, fields).await
    }

    async fn remove(&self, path: &DataPath) -> Result<(), StoreError> {
        self.calls.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(path).await
    }
}

// ============================================================================
// PREDICTION CLIENT
// ============================================================================

/// Returns a fixed answer and records every payload it was asked to score.
#[derive(Debug)]
pub struct StaticPredictionClient {
    response: Result<PredictionOutcome, PredictionError>,
    requests: Mutex<Vec<HealthFeatures>>,
}

impl StaticPredictionClient {
    pub fn answering(outcome: PredictionOutcome) -> Self {
        Self {
            response: Ok(outcome),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(err: PredictionError) -> Self {
        Self {
            response: Err(err),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<HealthFeatures> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl PredictionClient for StaticPredictionClient {
    async fn predict(&self, features: &HealthFeatures) -> Result<PredictionOutcome, PredictionError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(features.clone());
        self.response.clone()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for VitalSync types.

    use super::*;
    use proptest::prelude::*;

    /// Opaque user ids, including separators that must not break isolation.
    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        "[A-Za-z0-9:/_-]{1,28}".prop_map(UserId::from)
    }

    pub fn arb_record_id() -> impl Strategy<Value = RecordId> {
        "[A-Za-z0-9_-]{1,20}".prop_map(RecordId::from)
    }

    /// Timestamps between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    pub fn arb_reminder_type() -> impl Strategy<Value = ReminderType> {
        prop_oneof![Just(ReminderType::Medication), Just(ReminderType::Checkup)]
    }

    pub fn arb_message_type() -> impl Strategy<Value = MessageType> {
        prop_oneof![Just(MessageType::Saved), Just(MessageType::Favorite)]
    }

    pub fn arb_new_reminder() -> impl Strategy<Value = NewReminder> {
        (
            "[A-Za-z][A-Za-z ]{0,30}",
            (0u8..24, 0u8..60),
            prop::collection::vec(
                prop::sample::select(vec!["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"]),
                0..7,
            ),
            arb_reminder_type(),
            any::<bool>(),
        )
            .prop_map(|(title, (h, m), days, reminder_type, completed)| NewReminder {
                title,
                time: format!("{h:02}:{m:02}"),
                days: days.into_iter().map(str::to_string).collect(),
                reminder_type,
                completed,
            })
    }

    pub fn arb_new_glucose_reading() -> impl Strategy<Value = NewGlucoseReading> {
        (40.0f64..400.0).prop_map(|value| NewGlucoseReading { value })
    }

    pub fn arb_new_saved_message() -> impl Strategy<Value = NewSavedMessage> {
        (
            "[a-z0-9]{4,12}",
            "[a-z0-9]{4,12}",
            ".{0,80}",
            arb_timestamp(),
            arb_message_type(),
        )
            .prop_map(
                |(message_id, chat_id, content, timestamp, message_type)| NewSavedMessage {
                    message_id,
                    chat_id,
                    content,
                    timestamp,
                    message_type,
                },
            )
    }

    pub fn arb_profile() -> impl Strategy<Value = Profile> {
        (
            "[A-Z][a-z]{1,10}",
            "[A-Z][a-z]{1,12}",
            "[a-z]{1,10}@example\\.com",
            30.0f64..200.0,
            120.0f64..210.0,
            proptest::option::of(18u32..90),
        )
            .prop_map(|(first_name, last_name, email, weight, height, age)| Profile {
                first_name,
                last_name,
                email,
                weight,
                height,
                date_of_birth: "1990-01-01".to_string(),
                gender: None,
                age,
            })
    }

    pub fn arb_health_features() -> impl Strategy<Value = HealthFeatures> {
        (
            prop::sample::select(vec!["male", "female", "other"]),
            1.0f64..100.0,
            0u8..=1,
            0u8..=1,
            prop::sample::select(vec!["never", "former", "current", "not current", "ever"]),
            12.0f64..60.0,
            60.0f64..300.0,
        )
            .prop_map(
                |(gender, age, hypertension, heart_disease, smoking, bmi, glucose)| {
                    HealthFeatures {
                        gender: gender.to_string(),
                        age,
                        hypertension,
                        heart_disease,
                        smoking_history: smoking.to_string(),
                        bmi,
                        blood_glucose_level: glucose,
                    }
                },
            )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built records for common testing scenarios.

    use super::*;

    pub fn user(id: &str) -> UserId {
        UserId::from(id)
    }

    pub fn profile() -> Profile {
        Profile {
            first_name: "Ada".to_string(),
            last_name: "Byron".to_string(),
            email: "ada@example.com".to_string(),
            weight: 70.0,
            height: 175.0,
            date_of_birth: "1990-01-01".to_string(),
            gender: Some("female".to_string()),
            age: Some(34),
        }
    }

    pub fn new_reminder(title: &str) -> NewReminder {
        NewReminder {
            title: title.to_string(),
            time: "08:00".to_string(),
            days: vec!["Mon".to_string(), "Thu".to_string()],
            reminder_type: ReminderType::Medication,
            completed: false,
        }
    }

    pub fn new_glucose_reading(value: f64) -> NewGlucoseReading {
        NewGlucoseReading { value }
    }

    pub fn new_saved_message(content: &str, message_type: MessageType) -> NewSavedMessage {
        NewSavedMessage {
            message_id: format!("msg-{content}"),
            chat_id: "chat-1".to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
            message_type,
        }
    }

    pub fn health_features() -> HealthFeatures {
        HealthFeatures {
            gender: "female".to_string(),
            age: 52.0,
            hypertension: 1,
            heart_disease: 0,
            smoking_history: "former".to_string(),
            bmi: 31.2,
            blood_glucose_level: 160.0,
        }
    }

    pub fn prediction_outcome() -> PredictionOutcome {
        PredictionOutcome {
            prediction: "Diabetic".to_string(),
            confidence: "81.4%".to_string(),
            probabilities: Probabilities {
                non_diabetic: "18.6%".to_string(),
                diabetic: "81.4%".to_string(),
            },
        }
    }

    pub fn unavailable() -> StoreError {
        StoreError::Unavailable {
            reason: "network offline".to_string(),
        }
    }

    pub fn permission_denied(path: &str) -> StoreError {
        StoreError::PermissionDenied {
            path: path.to_string(),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for VitalSync-specific results.

    use super::*;

    #[track_caller]
    pub fn assert_unauthenticated<T: std::fmt::Debug>(result: &SyncResult<T>) {
        match result {
            Err(SyncError::Unauthenticated) => {}
            other => panic!("Expected Unauthenticated, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_permission_denied<T: std::fmt::Debug>(result: &SyncResult<T>) {
        match result {
            Err(err) if err.is_permission_denied() => {}
            other => panic!("Expected permission denied, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_transient<T: std::fmt::Debug>(result: &SyncResult<T>) {
        match result {
            Err(err) if err.is_retryable() => {}
            other => panic!("Expected transient store error, got: {:?}", other),
        }
    }
}
