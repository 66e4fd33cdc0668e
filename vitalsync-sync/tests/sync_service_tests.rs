//! Integration tests for the sync service against the in-memory datastore.
//!
//! Covers cache-first reads, write invalidation, live subscriptions,
//! per-user cleanup, permission-denied fallback and retried writes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use vitalsync_core::{
    BmiCategory, CachedResource, MessageType, ProfileUpdate, RecordId, Reminder, ReminderUpdate,
    ResourceKind, SavedMessageUpdate, SyncError, ValidationError,
};
use vitalsync_storage::{CacheConfig, CacheStore, UserScopedKey};
use vitalsync_sync::{Subscription, SyncService};
use vitalsync_test_utils::assertions::{
    assert_permission_denied, assert_transient, assert_unauthenticated,
};
use vitalsync_test_utils::fixtures;
use vitalsync_test_utils::{
    CountingStore, DataPath, FlakyStore, InMemoryRemoteStore, ManualClock, PredictionError,
    RecordingSleeper, RemoteStore, RetryPolicy, SessionIdentity, StaticPredictionClient,
};

// ============================================================================
// TEST HARNESS
// ============================================================================

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

struct Harness {
    store: InMemoryRemoteStore,
    identity: SessionIdentity,
    sleeper: RecordingSleeper,
    service: SyncService,
}

fn harness(user: Option<&str>) -> Harness {
    let store = InMemoryRemoteStore::new();
    let identity = match user {
        Some(user) => SessionIdentity::signed_in(user),
        None => SessionIdentity::new(),
    };
    let sleeper = RecordingSleeper::new();
    let service = SyncService::builder(Arc::new(store.clone()), Arc::new(identity.clone()))
        .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(100)))
        .with_sleeper(Arc::new(sleeper.clone()))
        .build();
    Harness {
        store,
        identity,
        sleeper,
        service,
    }
}

async fn next<T>(sub: &mut Subscription<T>) -> Option<T> {
    tokio::time::timeout(RECV_TIMEOUT, sub.recv())
        .await
        .expect("timed out waiting for subscription value")
}

fn reminders_path(user: &str) -> DataPath {
    DataPath::user_collection(ResourceKind::Reminders, &fixtures::user(user))
}

/// Aborted listener tasks release their store listener once the runtime
/// gets to them.
async fn wait_for_listeners(store: &InMemoryRemoteStore, expected: usize) {
    for _ in 0..10 {
        if store.listener_count() == expected {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(store.listener_count(), expected);
}

// ============================================================================
// READS AND CACHE
// ============================================================================

#[tokio::test]
async fn test_second_read_is_served_from_cache() {
    let store = CountingStore::new(InMemoryRemoteStore::new());
    let calls = store.calls();
    let service = SyncService::new(Arc::new(store), Arc::new(SessionIdentity::signed_in("u1")));

    service.add_reminder(fixtures::new_reminder("Metformin")).await.unwrap();
    let first = service.get_reminders().await.unwrap();
    let second = service.get_reminders().await.unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(first, second);
    assert_eq!(calls.reads(), 1);

    let stats = service.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn test_write_invalidates_and_next_read_refetches() {
    let h = harness(Some("u1"));

    assert!(h.service.get_reminders().await.unwrap().is_empty());
    let id = h
        .service
        .add_reminder(fixtures::new_reminder("Insulin"))
        .await
        .unwrap();

    let key = UserScopedKey::for_resource(&fixtures::user("u1"), ResourceKind::Reminders);
    assert!(h.service.cache().get(&key).is_none());

    let reminders = h.service.get_reminders().await.unwrap();
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].id, id);
    assert_eq!(reminders[0].title, "Insulin");
    assert_eq!(reminders[0].user_id, fixtures::user("u1"));
}

#[tokio::test]
async fn test_expired_entry_is_refetched() {
    let clock = ManualClock::new(Utc::now());
    let cache = CacheStore::with_clock(
        CacheConfig::new().with_ttl(Duration::from_secs(60)),
        Arc::new(clock.clone()),
    );
    let store = CountingStore::new(InMemoryRemoteStore::new());
    let calls = store.calls();
    let service = SyncService::builder(Arc::new(store), Arc::new(SessionIdentity::signed_in("u1")))
        .with_cache(cache)
        .build();

    service.get_glucose_readings().await.unwrap();
    clock.advance(Duration::from_secs(60));
    service.get_glucose_readings().await.unwrap();
    assert_eq!(calls.reads(), 1);

    clock.advance(Duration::from_secs(1));
    service.get_glucose_readings().await.unwrap();
    assert_eq!(calls.reads(), 2);
    assert_eq!(service.cache_stats().evictions, 1);
}

#[tokio::test]
async fn test_users_do_not_share_cache_entries() {
    let h = harness(Some("u1"));
    h.service.add_reminder(fixtures::new_reminder("Mine")).await.unwrap();
    assert_eq!(h.service.get_reminders().await.unwrap().len(), 1);

    h.identity.sign_in("u2");
    assert!(h.service.get_reminders().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_absent_profile_reads_as_none() {
    let h = harness(Some("u1"));
    assert_eq!(h.service.get_user_profile().await.unwrap(), None);

    h.service.set_user_profile(&fixtures::profile()).await.unwrap();
    let profile = h.service.get_user_profile().await.unwrap().unwrap();
    assert_eq!(profile.bmi(), 22.9);
}

#[tokio::test]
async fn test_profile_update_patches_cached_profile() {
    let h = harness(Some("u1"));
    h.service.set_user_profile(&fixtures::profile()).await.unwrap();
    h.service.get_user_profile().await.unwrap();

    let update = ProfileUpdate {
        weight: Some(80.0),
        ..Default::default()
    };
    h.service.update_user_profile(&update).await.unwrap();

    let key = UserScopedKey::for_resource(&fixtures::user("u1"), ResourceKind::Profile);
    let cached = h.service.cache().get(&key).and_then(CachedResource::into_profile);
    assert_eq!(cached.map(|p| p.weight), Some(80.0));

    let stored = h
        .store
        .value_at(&DataPath::user_collection(ResourceKind::Profile, &fixtures::user("u1")))
        .unwrap();
    assert_eq!(stored["weight"], 80.0);
    assert_eq!(stored["firstName"], "Ada");
}

#[tokio::test]
async fn test_profile_update_before_set_reads_back_partial() {
    let h = harness(Some("u1"));
    let update = ProfileUpdate {
        weight: Some(80.0),
        ..Default::default()
    };
    h.service.update_user_profile(&update).await.unwrap();

    let profile = h.service.get_user_profile().await.unwrap().unwrap();
    assert_eq!(profile.weight, 80.0);
    assert_eq!(profile.first_name, "");
    assert_eq!(profile.height, 0.0);
    assert_eq!(profile.bmi(), 0.0);
    assert_eq!(profile.bmi_category(), BmiCategory::Invalid);

    let mut sub = h.service.subscribe_to_user_profile();
    let pushed = next(&mut sub).await.unwrap().unwrap();
    assert_eq!(pushed.weight, 80.0);
}

#[tokio::test]
async fn test_delete_profile_clears_it() {
    let h = harness(Some("u1"));
    h.service.set_user_profile(&fixtures::profile()).await.unwrap();
    h.service.get_user_profile().await.unwrap();

    h.service.delete_user_profile().await.unwrap();
    assert_eq!(h.service.get_user_profile().await.unwrap(), None);
}

// ============================================================================
// WRITES
// ============================================================================

#[tokio::test]
async fn test_unauthenticated_operations_fail_fast() {
    let store = CountingStore::new(InMemoryRemoteStore::new());
    let calls = store.calls();
    let service = SyncService::new(Arc::new(store), Arc::new(SessionIdentity::new()));

    assert_unauthenticated(&service.add_reminder(fixtures::new_reminder("x")).await);
    assert_unauthenticated(&service.get_reminders().await);
    assert_unauthenticated(&service.delete_glucose_reading(&"r1".into()).await);
    assert_unauthenticated(&service.update_user_profile(&ProfileUpdate::default()).await);
    assert_unauthenticated(&service.request_prediction(fixtures::health_features()).await);

    assert_eq!(calls.reads(), 0);
    assert_eq!(calls.writes(), 0);
}

#[tokio::test]
async fn test_invalid_records_are_rejected_before_writing() {
    let h = harness(Some("u1"));

    let err = h
        .service
        .add_glucose_reading(fixtures::new_glucose_reading(-5.0))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(ValidationError::InvalidValue { .. })));

    let err = h
        .service
        .add_reminder(fixtures::new_reminder("   "))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Validation(ValidationError::RequiredFieldMissing { .. })
    ));
    assert!(h.store.value_at(&reminders_path("u1")).is_none());
}

#[tokio::test]
async fn test_transient_failures_are_retried_with_backoff() {
    let sleeper = RecordingSleeper::new();
    let store = Arc::new(FlakyStore::new(InMemoryRemoteStore::new()));
    store.fail_next(2, fixtures::unavailable());
    let service = SyncService::builder(store.clone(), Arc::new(SessionIdentity::signed_in("u1")))
        .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(100)))
        .with_sleeper(Arc::new(sleeper.clone()))
        .build();

    let id = service
        .add_reminder(fixtures::new_reminder("Metformin"))
        .await
        .unwrap();

    assert_eq!(store.attempts(), 3);
    assert_eq!(
        sleeper.delays(),
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );
    let stored = store
        .inner()
        .value_at(&reminders_path("u1").child(id.as_str()))
        .unwrap();
    assert_eq!(stored["title"], "Metformin");
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let sleeper = RecordingSleeper::new();
    let store = Arc::new(FlakyStore::new(InMemoryRemoteStore::new()));
    store.fail_next(10, fixtures::unavailable());
    let service = SyncService::builder(store.clone(), Arc::new(SessionIdentity::signed_in("u1")))
        .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(100)))
        .with_sleeper(Arc::new(sleeper.clone()))
        .build();

    let result = service.get_predictions().await;
    assert_transient(&result);
    assert_eq!(store.attempts(), 4);
    assert_eq!(sleeper.delays().len(), 3);
    assert_eq!(sleeper.delays()[2], Duration::from_millis(400));
}

#[tokio::test]
async fn test_permission_denied_is_not_retried() {
    let h = harness(Some("u1"));
    h.store.deny(reminders_path("u1"));

    let result = h.service.add_reminder(fixtures::new_reminder("x")).await;
    assert_permission_denied(&result);
    assert!(h.sleeper.delays().is_empty());
}

#[tokio::test]
async fn test_scripted_permission_failure_is_not_retried() {
    let sleeper = RecordingSleeper::new();
    let store = Arc::new(FlakyStore::new(InMemoryRemoteStore::new()));
    store.fail_next(3, fixtures::permission_denied("glucoseReadings/u1"));
    let service = SyncService::builder(store.clone(), Arc::new(SessionIdentity::signed_in("u1")))
        .with_sleeper(Arc::new(sleeper.clone()))
        .build();

    let result = service
        .add_glucose_reading(fixtures::new_glucose_reading(110.0))
        .await;

    assert_permission_denied(&result);
    assert_eq!(store.attempts(), 1);
    assert_eq!(store.pending_failures(), 2);
    assert!(sleeper.delays().is_empty());
}

#[tokio::test]
async fn test_retried_create_reuses_allocated_id() {
    let store = Arc::new(FlakyStore::new(CountingStore::new(InMemoryRemoteStore::new())));
    let calls = store.inner().calls();
    store.fail_next(1, fixtures::unavailable());
    let service = SyncService::builder(store.clone(), Arc::new(SessionIdentity::signed_in("u1")))
        .with_sleeper(Arc::new(RecordingSleeper::new()))
        .build();

    service
        .save_message(fixtures::new_saved_message("hello", MessageType::Saved))
        .await
        .unwrap();

    assert_eq!(calls.allocations(), 1);
    let messages = service.get_saved_messages(MessageType::Saved).await.unwrap();
    assert_eq!(messages.len(), 1);
}

#[tokio::test]
async fn test_message_views_filter_and_invalidate_together() {
    let h = harness(Some("u1"));
    let saved = h
        .service
        .save_message(fixtures::new_saved_message("keep", MessageType::Saved))
        .await
        .unwrap();
    h.service
        .save_message(fixtures::new_saved_message("star", MessageType::Favorite))
        .await
        .unwrap();

    let saved_view = h.service.get_saved_messages(MessageType::Saved).await.unwrap();
    let favorite_view = h
        .service
        .get_saved_messages(MessageType::Favorite)
        .await
        .unwrap();
    assert_eq!(saved_view.len(), 1);
    assert_eq!(saved_view[0].content, "keep");
    assert_eq!(favorite_view.len(), 1);
    assert_eq!(favorite_view[0].content, "star");

    let update = SavedMessageUpdate {
        message_type: Some(MessageType::Favorite),
        ..Default::default()
    };
    h.service.update_saved_message(&saved, &update).await.unwrap();

    assert!(h.service.get_saved_messages(MessageType::Saved).await.unwrap().is_empty());
    assert_eq!(
        h.service
            .get_saved_messages(MessageType::Favorite)
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn test_update_and_delete_reminder() {
    let h = harness(Some("u1"));
    let id = h
        .service
        .add_reminder(fixtures::new_reminder("Checkup"))
        .await
        .unwrap();

    let update = ReminderUpdate {
        completed: Some(true),
        ..Default::default()
    };
    h.service.update_reminder(&id, &update).await.unwrap();
    let reminders: Vec<Reminder> = h.service.get_reminders().await.unwrap();
    assert!(reminders[0].completed);

    h.service.delete_reminder(&id).await.unwrap();
    assert!(h.service.get_reminders().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_update_of_missing_reminder_leaves_list_readable() {
    let h = harness(Some("u1"));
    let id = h
        .service
        .add_reminder(fixtures::new_reminder("Real"))
        .await
        .unwrap();

    let update = ReminderUpdate {
        completed: Some(true),
        ..Default::default()
    };
    h.service
        .update_reminder(&RecordId::from("ghost"), &update)
        .await
        .unwrap();
    assert_eq!(
        h.store.value_at(&reminders_path("u1").child("ghost")),
        Some(json!({"completed": true}))
    );

    let reminders = h.service.get_reminders().await.unwrap();
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].id, id);

    let mut sub = h.service.subscribe_to_reminders();
    let pushed = next(&mut sub).await.unwrap();
    assert_eq!(pushed, reminders);
}

// ============================================================================
// PREDICTIONS
// ============================================================================

#[tokio::test]
async fn test_request_prediction_stores_result() {
    let client = Arc::new(StaticPredictionClient::answering(fixtures::prediction_outcome()));
    let service = SyncService::builder(
        Arc::new(InMemoryRemoteStore::new()),
        Arc::new(SessionIdentity::signed_in("u1")),
    )
    .with_prediction_client(client.clone())
    .build();

    let prediction = service
        .request_prediction(fixtures::health_features())
        .await
        .unwrap();
    assert_eq!(prediction.prediction, "Diabetic");
    assert_eq!(prediction.features, fixtures::health_features());
    assert_eq!(client.requests().len(), 1);

    let stored = service.get_predictions().await.unwrap();
    assert_eq!(stored, vec![prediction]);
}

#[tokio::test]
async fn test_request_prediction_without_client() {
    let h = harness(Some("u1"));
    let err = h
        .service
        .request_prediction(fixtures::health_features())
        .await
        .unwrap_err();
    assert_eq!(err, SyncError::Prediction(PredictionError::NotConfigured));
}

#[tokio::test]
async fn test_request_prediction_failure_stores_nothing() {
    let client = Arc::new(StaticPredictionClient::failing(PredictionError::Status {
        status: 503,
        detail: "model loading".to_string(),
    }));
    let store = InMemoryRemoteStore::new();
    let service = SyncService::builder(
        Arc::new(store.clone()),
        Arc::new(SessionIdentity::signed_in("u1")),
    )
    .with_prediction_client(client.clone())
    .build();

    let err = service
        .request_prediction(fixtures::health_features())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Prediction(PredictionError::Status { status: 503, .. })));
    assert_eq!(client.requests().len(), 1);
    assert!(store
        .value_at(&DataPath::user_collection(
            ResourceKind::Predictions,
            &fixtures::user("u1")
        ))
        .is_none());
}

#[tokio::test]
async fn test_invalid_features_never_reach_the_service() {
    let client = Arc::new(StaticPredictionClient::answering(fixtures::prediction_outcome()));
    let service = SyncService::builder(
        Arc::new(InMemoryRemoteStore::new()),
        Arc::new(SessionIdentity::signed_in("u1")),
    )
    .with_prediction_client(client.clone())
    .build();

    let mut features = fixtures::health_features();
    features.hypertension = 3;
    let err = service.request_prediction(features).await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    assert!(client.requests().is_empty());
}

// ============================================================================
// SUBSCRIPTIONS
// ============================================================================

#[tokio::test]
async fn test_subscription_emits_cached_value_first() {
    let h = harness(Some("u1"));
    h.service.add_reminder(fixtures::new_reminder("A")).await.unwrap();
    let cached = h.service.get_reminders().await.unwrap();

    let mut sub = h.service.subscribe_to_reminders();
    assert_eq!(sub.try_recv(), Some(cached.clone()));

    // The listener then delivers the current remote value.
    assert_eq!(next(&mut sub).await, Some(cached));
}

#[tokio::test]
async fn test_subscription_delivers_live_updates_in_order() {
    let h = harness(Some("u1"));
    let mut sub = h.service.subscribe_to_glucose_readings();
    assert_eq!(next(&mut sub).await, Some(vec![]));

    h.service
        .add_glucose_reading(fixtures::new_glucose_reading(110.0))
        .await
        .unwrap();
    h.service
        .add_glucose_reading(fixtures::new_glucose_reading(95.0))
        .await
        .unwrap();

    let first = next(&mut sub).await.unwrap();
    let second = next(&mut sub).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 2);

    // Pushes refresh the cache.
    let key = UserScopedKey::for_resource(&fixtures::user("u1"), ResourceKind::GlucoseReadings);
    assert!(matches!(
        h.service.cache().get(&key),
        Some(CachedResource::GlucoseReadings(items)) if items.len() == 2
    ));
}

#[tokio::test]
async fn test_unauthenticated_subscription_emits_empty() {
    let h = harness(None);
    let mut reminders = h.service.subscribe_to_reminders();
    assert_eq!(reminders.try_recv(), Some(vec![]));
    assert!(reminders.key().is_none());

    let mut profile = h.service.subscribe_to_user_profile();
    assert_eq!(profile.try_recv(), Some(None));
    assert!(h.service.registry().is_empty());
}

#[tokio::test]
async fn test_profile_subscription_follows_writes() {
    let h = harness(Some("u1"));
    let mut sub = h.service.subscribe_to_user_profile();
    assert_eq!(next(&mut sub).await, Some(None));

    h.service.set_user_profile(&fixtures::profile()).await.unwrap();
    let profile = next(&mut sub).await.unwrap().unwrap();
    assert_eq!(profile.first_name, "Ada");
}

#[tokio::test]
async fn test_cleanup_for_one_user_leaves_others_running() {
    let h = harness(Some("u1"));
    let mut first = h.service.subscribe_to_reminders();
    assert_eq!(next(&mut first).await, Some(vec![]));

    h.identity.sign_in("u2");
    let mut second = h.service.subscribe_to_reminders();
    assert_eq!(next(&mut second).await, Some(vec![]));
    assert_eq!(h.service.registry().len(), 2);

    assert_eq!(h.service.cleanup(Some(&fixtures::user("u1"))), 1);
    assert!(first.is_cancelled());
    assert_eq!(first.recv().await, None);

    h.service.add_reminder(fixtures::new_reminder("Still here")).await.unwrap();
    let pushed = next(&mut second).await.unwrap();
    assert_eq!(pushed[0].title, "Still here");
    assert_eq!(h.service.registry().len(), 1);
}

#[tokio::test]
async fn test_cleanup_reaches_every_subscription_on_a_topic() {
    let h = harness(Some("u1"));
    let mut first = h.service.subscribe_to_reminders();
    assert_eq!(next(&mut first).await, Some(vec![]));
    let mut second = h.service.subscribe_to_reminders();
    assert_eq!(next(&mut second).await, Some(vec![]));
    assert_eq!(h.store.listener_count(), 2);
    assert_eq!(h.service.registry().len(), 1);

    assert_eq!(h.service.cleanup(Some(&fixtures::user("u1"))), 1);
    assert!(first.is_cancelled());
    assert!(second.is_cancelled());

    h.service
        .add_reminder(fixtures::new_reminder("After cleanup"))
        .await
        .unwrap();
    assert_eq!(first.recv().await, None);
    assert_eq!(second.recv().await, None);
    wait_for_listeners(&h.store, 0).await;
}

#[tokio::test]
async fn test_one_subscriber_leaving_keeps_the_other_on_the_topic() {
    let h = harness(Some("u1"));
    let first = h.service.subscribe_to_reminders();
    let mut second = h.service.subscribe_to_reminders();
    assert_eq!(next(&mut second).await, Some(vec![]));

    drop(first);
    wait_for_listeners(&h.store, 1).await;
    assert!(!second.is_cancelled());

    h.service
        .add_reminder(fixtures::new_reminder("Still live"))
        .await
        .unwrap();
    let pushed = next(&mut second).await.unwrap();
    assert_eq!(pushed[0].title, "Still live");

    assert_eq!(h.service.cleanup(None), 1);
    assert!(second.is_cancelled());
}

#[tokio::test]
async fn test_dropped_subscription_is_pruned_when_another_registers() {
    let h = harness(Some("u1"));
    let reminders = h.service.subscribe_to_reminders();
    let _profile = h.service.subscribe_to_user_profile();
    assert_eq!(h.service.registry().len(), 2);

    drop(reminders);
    let _readings = h.service.subscribe_to_glucose_readings();

    assert_eq!(h.service.registry().len(), 2);
    assert_eq!(h.service.cleanup(None), 2);
}

#[tokio::test]
async fn test_cleanup_all_cancels_everything() {
    let h = harness(Some("u1"));
    let mut reminders = h.service.subscribe_to_reminders();
    let mut profile = h.service.subscribe_to_user_profile();

    assert_eq!(h.service.cleanup(None), 2);
    assert_eq!(reminders.recv().await, None);
    assert_eq!(profile.recv().await, None);
    assert!(h.service.registry().is_empty());
}

#[tokio::test]
async fn test_permission_denied_notifies_and_falls_back_to_cache() {
    let h = harness(Some("u1"));
    h.service.add_reminder(fixtures::new_reminder("A")).await.unwrap();
    let cached = h.service.get_reminders().await.unwrap();
    let mut notifications = h.service.notifications();

    h.store.deny(reminders_path("u1"));
    let mut sub = h.service.subscribe_to_reminders();

    assert_eq!(sub.try_recv(), Some(cached.clone()));
    assert_eq!(next(&mut sub).await, Some(cached));

    let notification = tokio::time::timeout(RECV_TIMEOUT, notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(notification.is_permission_denied());
    assert_eq!(notification.resource, Some(ResourceKind::Reminders));
    assert_eq!(notification.user_id, Some(fixtures::user("u1")));
}

#[tokio::test]
async fn test_push_error_without_cache_emits_empty() {
    let h = harness(Some("u1"));
    let mut sub = h.service.subscribe_to_reminders();
    assert_eq!(next(&mut sub).await, Some(vec![]));

    h.service.cache().clear();
    h.store.push_error(&reminders_path("u1"), fixtures::unavailable());
    assert_eq!(next(&mut sub).await, Some(vec![]));
}

#[tokio::test]
async fn test_dropping_subscription_detaches_listener() {
    let h = harness(Some("u1"));
    let mut sub = h.service.subscribe_to_reminders();
    assert_eq!(next(&mut sub).await, Some(vec![]));
    assert_eq!(h.store.listener_count(), 1);

    drop(sub);
    wait_for_listeners(&h.store, 0).await;
}

#[tokio::test]
async fn test_end_session_cancels_and_evicts() {
    let h = harness(Some("u1"));
    h.service.get_reminders().await.unwrap();
    h.service.get_glucose_readings().await.unwrap();
    let mut sub = h.service.subscribe_to_reminders();

    h.service.end_session(&fixtures::user("u1"));

    assert_eq!(sub.recv().await, None);
    assert!(h.service.cache().is_empty());
    assert!(h.service.registry().is_empty());
}

#[tokio::test]
async fn test_predictions_are_listed_newest_first() {
    let h = harness(Some("u1"));
    let features = fixtures::health_features();
    let outcome = fixtures::prediction_outcome();
    let path = DataPath::user_collection(ResourceKind::Predictions, &fixtures::user("u1"));

    for (id, ts) in [
        ("a", "2024-01-01T00:00:00Z"),
        ("b", "2024-03-01T00:00:00Z"),
        ("c", "2024-02-01T00:00:00Z"),
    ] {
        let mut value = serde_json::json!({
            "userId": "u1",
            "prediction": outcome.prediction,
            "confidence": outcome.confidence,
            "probabilities": outcome.probabilities,
            "timestamp": ts,
        });
        let flat = serde_json::to_value(&features).unwrap();
        if let (Some(map), Some(extra)) = (value.as_object_mut(), flat.as_object()) {
            map.extend(extra.clone());
        }
        h.store.set(&path.clone().child(id), value).await.unwrap();
    }

    let ids: Vec<String> = h
        .service
        .get_predictions()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id.into_inner())
        .collect();
    assert_eq!(ids, vec!["b", "c", "a"]);
}
