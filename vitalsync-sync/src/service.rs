//! The sync service: cache-first reads, live subscriptions and retried
//! writes for one signed-in user's data.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use vitalsync_core::{
    CachedResource, GlucoseReading, GlucoseReadingUpdate, HealthFeatures, MessageType,
    NewGlucoseReading, NewPrediction, NewReminder, NewSavedMessage, Prediction, PredictionError,
    PredictionUpdate, Profile, ProfileUpdate, RecordId, Reminder, ReminderUpdate, ResourceKind,
    SavedMessage, SavedMessageUpdate, StoreError, SyncError, SyncResult, UserId,
};
use vitalsync_storage::{
    with_retry_if, CacheStats, CacheStore, CancelHandle, DataPath, HandleKey, IdentityProvider,
    RemoteStore, RetryPolicy, Sleeper, SubscriptionRegistry, TokioSleeper, UserScopedKey,
};

use crate::collection::{message_view, Feed, ListFeed, ProfileFeed, UserCollection};
use crate::config::SyncConfig;
use crate::notifications::{Notification, Notifier};
use crate::prediction::{HttpPredictionClient, PredictionClient};
use crate::subscription::Subscription;

/// Builder for [`SyncService`].
pub struct SyncServiceBuilder {
    store: Arc<dyn RemoteStore>,
    identity: Arc<dyn IdentityProvider>,
    cache: Option<CacheStore>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    notifier: Notifier,
    predictor: Option<Arc<dyn PredictionClient>>,
}

impl SyncServiceBuilder {
    /// Apply retry, cache TTL and notification settings from `config`, and
    /// attach an HTTP prediction client when a `[prediction]` section is set.
    pub fn with_config(mut self, config: &SyncConfig) -> SyncResult<Self> {
        self.retry = config.retry_policy();
        self.cache = Some(CacheStore::new(config.cache_config()));
        self.notifier = Notifier::new(config.notifications.capacity);
        if let Some(prediction) = &config.prediction {
            let client = HttpPredictionClient::from_config(prediction)?;
            debug!(endpoint = %client.endpoint(), "prediction client configured");
            self.predictor = Some(Arc::new(client));
        }
        Ok(self)
    }

    /// Use `cache` instead of a fresh store with the default TTL. Share one
    /// store between services to share cached views.
    pub fn with_cache(mut self, cache: CacheStore) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Backoff for store reads and writes.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the tokio timer used between retries, e.g. with a
    /// [`RecordingSleeper`](vitalsync_storage::RecordingSleeper) in tests.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Client used by [`SyncService::request_prediction`]. Overrides one set
    /// by [`with_config`](Self::with_config).
    pub fn with_prediction_client(mut self, predictor: Arc<dyn PredictionClient>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    /// Finish the service with an empty subscription registry.
    pub fn build(self) -> SyncService {
        SyncService {
            store: self.store,
            identity: self.identity,
            cache: self.cache.unwrap_or_default(),
            registry: SubscriptionRegistry::new(),
            retry: self.retry,
            sleeper: self.sleeper,
            notifier: self.notifier,
            predictor: self.predictor,
        }
    }
}

/// Data access for the signed-in user.
///
/// Reads are served from the cache when possible, subscriptions emit the
/// cached value before attaching a live listener, and writes go through the
/// retry wrapper and invalidate the affected cache views.
pub struct SyncService {
    store: Arc<dyn RemoteStore>,
    identity: Arc<dyn IdentityProvider>,
    cache: CacheStore,
    registry: SubscriptionRegistry,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    notifier: Notifier,
    predictor: Option<Arc<dyn PredictionClient>>,
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("retry", &self.retry)
            .field("cache", &self.cache)
            .field("subscriptions", &self.registry.len())
            .field("prediction_client", &self.predictor.is_some())
            .finish()
    }
}

impl SyncService {
    /// Start a builder with the default retry policy, cache TTL and
    /// notification capacity, and no prediction client.
    pub fn builder(
        store: Arc<dyn RemoteStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> SyncServiceBuilder {
        SyncServiceBuilder {
            store,
            identity,
            cache: None,
            retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            notifier: Notifier::default(),
            predictor: None,
        }
    }

    /// A service with every default. See [`builder`](Self::builder).
    pub fn new(store: Arc<dyn RemoteStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self::builder(store, identity).build()
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Receiver for side-channel notifications published from now on.
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    // ------------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------------

    fn require_user(&self) -> SyncResult<UserId> {
        self.identity.current_user().ok_or(SyncError::Unauthenticated)
    }

    /// Retry transient store failures; everything else fails on first sight.
    async fn retrying<T, F, Fut>(&self, operation: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        with_retry_if(
            &self.retry,
            self.sleeper.as_ref(),
            StoreError::is_transient,
            operation,
        )
        .await
        .map_err(SyncError::from)
    }

    fn invalidate(&self, user_id: &UserId, views: &[ResourceKind]) {
        for view in views {
            self.cache
                .invalidate(&UserScopedKey::for_resource(user_id, *view));
        }
    }

    async fn read<F: Feed>(&self, feed: &F) -> SyncResult<F::Item> {
        let user_id = self.require_user()?;
        let kind = feed.kind();
        let key = UserScopedKey::for_resource(&user_id, kind);

        if let Some(hit) = self.cache.get(&key).and_then(|c| feed.from_cached(c)) {
            debug!(user_id = %user_id, resource = kind.cache_name(), "serving from cache");
            return Ok(hit);
        }

        let path = DataPath::user_collection(kind, &user_id);
        debug!(user_id = %user_id, resource = kind.cache_name(), path = %path, "cache miss, reading remote");
        let snapshot = self.retrying(|| self.store.read_once(&path)).await?;
        let (item, cached) = feed.decode(&snapshot)?;
        if let Some(cached) = cached {
            self.cache.set(key, cached);
        }
        Ok(item)
    }

    /// Emit the cached value if any, then attach a live listener.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    fn subscribe<F: Feed>(&self, feed: F) -> Subscription<F::Item> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let kind = feed.kind();

        let Some(user_id) = self.identity.current_user() else {
            warn!(
                resource = kind.cache_name(),
                "subscription requested without an authenticated user"
            );
            let _ = sender.send(feed.empty());
            return Subscription::detached(receiver);
        };

        let key = UserScopedKey::for_resource(&user_id, kind);
        if let Some(cached) = self.cache.get(&key).and_then(|c| feed.from_cached(c)) {
            debug!(user_id = %user_id, resource = kind.cache_name(), "serving from cache");
            let _ = sender.send(cached);
        }

        let path = DataPath::user_collection(kind, &user_id);
        let mut stream = self.store.listen(&path);
        debug!(user_id = %user_id, resource = kind.cache_name(), path = %path, "listener attached");

        let cache = self.cache.clone();
        let notifier = self.notifier.clone();
        let listener_user = user_id.clone();
        let task = tokio::spawn(async move {
            while let Some(pushed) = stream.next().await {
                let emitted = match pushed.and_then(|snapshot| feed.decode(&snapshot)) {
                    Ok((item, cached)) => {
                        if let Some(cached) = cached {
                            cache.set(key.clone(), cached);
                        }
                        item
                    }
                    Err(err) => {
                        error!(
                            user_id = %listener_user,
                            resource = kind.cache_name(),
                            error = %err,
                            "subscription error"
                        );
                        if err.is_permission_denied() {
                            warn!(
                                user_id = %listener_user,
                                resource = kind.cache_name(),
                                "permission denied, check datastore access rules"
                            );
                            notifier.publish(Notification::permission_denied(kind, &listener_user));
                        }
                        cache
                            .get(&key)
                            .and_then(|c| feed.from_cached(c))
                            .unwrap_or_else(|| feed.empty())
                    }
                };
                if sender.send(emitted).is_err() {
                    break;
                }
            }
            debug!(user_id = %listener_user, resource = kind.cache_name(), "listener detached");
        });

        let abort = task.abort_handle();
        let handle = CancelHandle::new(move || abort.abort());
        let handle_key = HandleKey::for_resource(kind, &user_id);
        self.register_listener(&handle_key, handle.clone());
        Subscription::new(receiver, handle, Some(handle_key))
    }

    /// Register `handle`, joining it with any live handle it displaces so
    /// cleanup still reaches every listener on the key.
    fn register_listener(&self, key: &HandleKey, handle: CancelHandle) {
        let mut current = handle;
        while let Some(displaced) = self.registry.register(key.clone(), current.clone()) {
            if displaced.is_cancelled() || current.covers(&displaced) {
                break;
            }
            debug!(key = %key, "joining displaced subscription handle");
            current = CancelHandle::joined([displaced, current]);
        }
    }

    // ------------------------------------------------------------------------
    // Generic list operations
    // ------------------------------------------------------------------------

    /// Create a record. The id is allocated once, so retries rewrite the
    /// same path.
    pub async fn add<T: UserCollection>(&self, new: T::New) -> SyncResult<T> {
        let user_id = self.require_user()?;
        T::validate_new(&new)?;

        let collection = DataPath::user_collection(T::KIND, &user_id);
        let id = self.store.allocate_key(&collection);
        let record = T::build(new, id.clone(), user_id.clone(), Utc::now());
        let value = serde_json::to_value(&record)?;
        let path = collection.child(id.as_str());

        self.retrying(|| self.store.set(&path, value.clone())).await?;
        self.invalidate(&user_id, &[record.view()]);
        info!(user_id = %user_id, resource = T::KIND.cache_name(), id = %id, "record added");
        Ok(record)
    }

    /// Merge `update` into the record at `id` and invalidate every view of
    /// the collection.
    ///
    /// The store merges into whatever is at the path, so updating an id that
    /// does not exist leaves a partial record there. List reads skip records
    /// that do not decode, so such a write never hides its siblings.
    pub async fn update<T: UserCollection>(&self, id: &RecordId, update: &T::Update) -> SyncResult<()> {
        let user_id = self.require_user()?;
        let value = serde_json::to_value(update)?;
        let path = DataPath::user_record(T::KIND, &user_id, id);

        self.retrying(|| self.store.update(&path, value.clone())).await?;
        self.invalidate(&user_id, T::VIEWS);
        info!(user_id = %user_id, resource = T::KIND.cache_name(), id = %id, "record updated");
        Ok(())
    }

    /// Remove the record at `id`. Removing a missing record succeeds.
    pub async fn delete<T: UserCollection>(&self, id: &RecordId) -> SyncResult<()> {
        let user_id = self.require_user()?;
        let path = DataPath::user_record(T::KIND, &user_id, id);

        self.retrying(|| self.store.remove(&path)).await?;
        self.invalidate(&user_id, T::VIEWS);
        info!(user_id = %user_id, resource = T::KIND.cache_name(), id = %id, "record deleted");
        Ok(())
    }

    /// Records in `view`, cache first.
    pub async fn list<T: UserCollection>(&self, view: ResourceKind) -> SyncResult<Vec<T>> {
        self.read(&ListFeed::<T>::new(view)).await
    }

    /// Live records in `view`. See [`subscribe_to_reminders`](Self::subscribe_to_reminders).
    pub fn subscribe_list<T: UserCollection>(&self, view: ResourceKind) -> Subscription<Vec<T>> {
        self.subscribe(ListFeed::<T>::new(view))
    }

    // ------------------------------------------------------------------------
    // Reminders
    // ------------------------------------------------------------------------

    /// Store a new reminder and return its allocated id.
    ///
    /// Fails with a validation error, before touching the store, when the
    /// title is blank.
    pub async fn add_reminder(&self, reminder: NewReminder) -> SyncResult<RecordId> {
        Ok(self.add::<Reminder>(reminder).await?.id)
    }

    pub async fn update_reminder(&self, id: &RecordId, update: &ReminderUpdate) -> SyncResult<()> {
        self.update::<Reminder>(id, update).await
    }

    pub async fn delete_reminder(&self, id: &RecordId) -> SyncResult<()> {
        self.delete::<Reminder>(id).await
    }

    /// The user's reminders in key order, from the cache while it is fresh.
    pub async fn get_reminders(&self) -> SyncResult<Vec<Reminder>> {
        self.list(ResourceKind::Reminders).await
    }

    /// Live reminder list.
    ///
    /// A fresh cached list is yielded first, then the list on every push from
    /// the store. Push errors yield the cached list, or an empty one, and a
    /// permission failure also publishes a notification. Without a signed-in
    /// user the subscription yields one empty list and ends.
    ///
    /// Cancel it directly, by dropping it, or through [`cleanup`](Self::cleanup).
    pub fn subscribe_to_reminders(&self) -> Subscription<Vec<Reminder>> {
        self.subscribe_list(ResourceKind::Reminders)
    }

    // ------------------------------------------------------------------------
    // Glucose readings
    // ------------------------------------------------------------------------

    /// Store a reading stamped with the current time. Non-finite and
    /// non-positive values are rejected.
    pub async fn add_glucose_reading(&self, reading: NewGlucoseReading) -> SyncResult<RecordId> {
        Ok(self.add::<GlucoseReading>(reading).await?.id)
    }

    pub async fn update_glucose_reading(
        &self,
        id: &RecordId,
        update: &GlucoseReadingUpdate,
    ) -> SyncResult<()> {
        self.update::<GlucoseReading>(id, update).await
    }

    pub async fn delete_glucose_reading(&self, id: &RecordId) -> SyncResult<()> {
        self.delete::<GlucoseReading>(id).await
    }

    pub async fn get_glucose_readings(&self) -> SyncResult<Vec<GlucoseReading>> {
        self.list(ResourceKind::GlucoseReadings).await
    }

    /// Live readings, with the same delivery rules as
    /// [`subscribe_to_reminders`](Self::subscribe_to_reminders).
    pub fn subscribe_to_glucose_readings(&self) -> Subscription<Vec<GlucoseReading>> {
        self.subscribe_list(ResourceKind::GlucoseReadings)
    }

    // ------------------------------------------------------------------------
    // Saved messages
    // ------------------------------------------------------------------------

    /// Save a chat message as either a saved or a favorite message.
    pub async fn save_message(&self, message: NewSavedMessage) -> SyncResult<RecordId> {
        Ok(self.add::<SavedMessage>(message).await?.id)
    }

    /// Changing the message type moves it between views; both are invalidated.
    pub async fn update_saved_message(
        &self,
        id: &RecordId,
        update: &SavedMessageUpdate,
    ) -> SyncResult<()> {
        self.update::<SavedMessage>(id, update).await
    }

    pub async fn remove_saved_message(&self, id: &RecordId) -> SyncResult<()> {
        self.delete::<SavedMessage>(id).await
    }

    /// Messages of one type. Saved and favorite messages share a collection
    /// but are cached as separate views.
    pub async fn get_saved_messages(
        &self,
        message_type: MessageType,
    ) -> SyncResult<Vec<SavedMessage>> {
        self.list(message_view(message_type)).await
    }

    pub fn subscribe_to_saved_messages(
        &self,
        message_type: MessageType,
    ) -> Subscription<Vec<SavedMessage>> {
        self.subscribe_list(message_view(message_type))
    }

    // ------------------------------------------------------------------------
    // Predictions
    // ------------------------------------------------------------------------

    /// Store an already scored prediction. Use
    /// [`request_prediction`](Self::request_prediction) to score and store in one step.
    pub async fn add_prediction(&self, prediction: NewPrediction) -> SyncResult<RecordId> {
        Ok(self.add::<Prediction>(prediction).await?.id)
    }

    pub async fn update_prediction(&self, id: &RecordId, update: &PredictionUpdate) -> SyncResult<()> {
        self.update::<Prediction>(id, update).await
    }

    pub async fn delete_prediction(&self, id: &RecordId) -> SyncResult<()> {
        self.delete::<Prediction>(id).await
    }

    /// Newest first.
    pub async fn get_predictions(&self) -> SyncResult<Vec<Prediction>> {
        self.list(ResourceKind::Predictions).await
    }

    pub fn subscribe_to_predictions(&self) -> Subscription<Vec<Prediction>> {
        self.subscribe_list(ResourceKind::Predictions)
    }

    /// Score `features` with the prediction service and store the result.
    ///
    /// The service call itself is made once; only the store write is retried.
    pub async fn request_prediction(&self, features: HealthFeatures) -> SyncResult<Prediction> {
        self.require_user()?;
        features.validate()?;
        let predictor = self.predictor.as_ref().ok_or(PredictionError::NotConfigured)?;

        let outcome = predictor.predict(&features).await?;
        info!(prediction = %outcome.prediction, confidence = %outcome.confidence, "prediction received");
        self.add::<Prediction>(NewPrediction { features, outcome }).await
    }

    // ------------------------------------------------------------------------
    // Profile
    // ------------------------------------------------------------------------

    /// The stored profile, or `None` if the user has none. Fields never
    /// written read back as empty or zero.
    pub async fn get_user_profile(&self) -> SyncResult<Option<Profile>> {
        self.read(&ProfileFeed).await
    }

    pub fn subscribe_to_user_profile(&self) -> Subscription<Option<Profile>> {
        self.subscribe(ProfileFeed)
    }

    /// Write the whole profile, replacing any existing one.
    pub async fn set_user_profile(&self, profile: &Profile) -> SyncResult<()> {
        let user_id = self.require_user()?;
        let value = serde_json::to_value(profile)?;
        let path = DataPath::user_collection(ResourceKind::Profile, &user_id);

        self.retrying(|| self.store.set(&path, value.clone())).await?;
        self.invalidate(&user_id, &[ResourceKind::Profile]);
        info!(user_id = %user_id, "profile written");
        Ok(())
    }

    /// Apply a partial update. A cached profile is patched in place.
    ///
    /// Updating before any profile was set stores just the given fields.
    pub async fn update_user_profile(&self, update: &ProfileUpdate) -> SyncResult<()> {
        let user_id = self.require_user()?;
        let value = serde_json::to_value(update)?;
        let path = DataPath::user_collection(ResourceKind::Profile, &user_id);

        self.retrying(|| self.store.update(&path, value.clone())).await?;

        let key = UserScopedKey::for_resource(&user_id, ResourceKind::Profile);
        if let Some(mut profile) = self.cache.get(&key).and_then(CachedResource::into_profile) {
            profile.apply(update);
            self.cache.set(key, CachedResource::Profile(profile));
            debug!(user_id = %user_id, "cached profile patched");
        }
        info!(user_id = %user_id, "profile updated");
        Ok(())
    }

    /// Remove the profile. Subscribers see `None` on the next push.
    pub async fn delete_user_profile(&self) -> SyncResult<()> {
        let user_id = self.require_user()?;
        let path = DataPath::user_collection(ResourceKind::Profile, &user_id);

        self.retrying(|| self.store.remove(&path)).await?;
        self.invalidate(&user_id, &[ResourceKind::Profile]);
        info!(user_id = %user_id, "profile deleted");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Cancel the subscriptions of `user_id`, or all of them when `None`.
    pub fn cleanup(&self, user_id: Option<&UserId>) -> usize {
        self.registry.cleanup(user_id)
    }

    /// Cancel a user's subscriptions and drop their cache entries.
    pub fn end_session(&self, user_id: &UserId) {
        let cancelled = self.registry.cleanup(Some(user_id));
        let evicted = self.cache.invalidate_user(user_id);
        info!(user_id = %user_id, cancelled, evicted, "session ended");
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        self.registry.cleanup(None);
    }
}
