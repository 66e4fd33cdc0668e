//! How each list resource maps onto remote paths and cache views.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use vitalsync_core::{
    CachedResource, GlucoseReading, GlucoseReadingUpdate, MessageType, NewGlucoseReading,
    NewPrediction, NewReminder, NewSavedMessage, Prediction, PredictionUpdate, Profile, RecordId,
    Reminder, ReminderUpdate, ResourceKind, SavedMessage, SavedMessageUpdate, StoreError,
    Timestamp, UserId, ValidationError,
};
use tracing::warn;
use vitalsync_storage::Snapshot;

/// A record type stored as children of `<collection>/<uid>`.
pub trait UserCollection:
    Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Caller-supplied fields of a new record.
    type New: Send;
    /// Partial update payload.
    type Update: Serialize + Send + Sync;

    /// Resource whose collection holds the records.
    const KIND: ResourceKind;

    /// Cache views derived from the collection. Updates and deletes
    /// invalidate all of them.
    const VIEWS: &'static [ResourceKind];

    fn build(new: Self::New, id: RecordId, user_id: UserId, now: Timestamp) -> Self;

    fn validate_new(_new: &Self::New) -> Result<(), ValidationError> {
        Ok(())
    }

    fn id(&self) -> &RecordId;

    /// The view a newly added record appears in.
    fn view(&self) -> ResourceKind {
        Self::KIND
    }

    fn in_view(&self, view: ResourceKind) -> bool {
        view == Self::KIND
    }

    /// Put a decoded view in presentation order. Defaults to key order.
    fn order(_items: &mut [Self]) {}

    fn into_cached(items: Vec<Self>) -> CachedResource;

    fn from_cached(cached: CachedResource) -> Option<Vec<Self>>;
}

impl UserCollection for Reminder {
    type New = NewReminder;
    type Update = ReminderUpdate;
    const KIND: ResourceKind = ResourceKind::Reminders;
    const VIEWS: &'static [ResourceKind] = &[ResourceKind::Reminders];

    fn build(new: NewReminder, id: RecordId, user_id: UserId, now: Timestamp) -> Self {
        Reminder {
            id,
            title: new.title,
            time: new.time,
            days: new.days,
            reminder_type: new.reminder_type,
            completed: new.completed,
            user_id,
            created_at: now,
        }
    }

    fn validate_new(new: &NewReminder) -> Result<(), ValidationError> {
        if new.title.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "title".to_string(),
            });
        }
        Ok(())
    }

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn into_cached(items: Vec<Self>) -> CachedResource {
        CachedResource::Reminders(items)
    }

    fn from_cached(cached: CachedResource) -> Option<Vec<Self>> {
        match cached {
            CachedResource::Reminders(items) => Some(items),
            _ => None,
        }
    }
}

impl UserCollection for GlucoseReading {
    type New = NewGlucoseReading;
    type Update = GlucoseReadingUpdate;
    const KIND: ResourceKind = ResourceKind::GlucoseReadings;
    const VIEWS: &'static [ResourceKind] = &[ResourceKind::GlucoseReadings];

    fn build(new: NewGlucoseReading, id: RecordId, user_id: UserId, now: Timestamp) -> Self {
        GlucoseReading {
            id,
            value: new.value,
            timestamp: now,
            user_id,
        }
    }

    fn validate_new(new: &NewGlucoseReading) -> Result<(), ValidationError> {
        new.validate()
    }

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn into_cached(items: Vec<Self>) -> CachedResource {
        CachedResource::GlucoseReadings(items)
    }

    fn from_cached(cached: CachedResource) -> Option<Vec<Self>> {
        match cached {
            CachedResource::GlucoseReadings(items) => Some(items),
            _ => None,
        }
    }
}

/// Cache view holding messages of `message_type`.
pub fn message_view(message_type: MessageType) -> ResourceKind {
    match message_type {
        MessageType::Saved => ResourceKind::SavedMessages,
        MessageType::Favorite => ResourceKind::FavoriteMessages,
    }
}

impl UserCollection for SavedMessage {
    type New = NewSavedMessage;
    type Update = SavedMessageUpdate;
    const KIND: ResourceKind = ResourceKind::SavedMessages;
    const VIEWS: &'static [ResourceKind] =
        &[ResourceKind::SavedMessages, ResourceKind::FavoriteMessages];

    fn build(new: NewSavedMessage, id: RecordId, user_id: UserId, now: Timestamp) -> Self {
        SavedMessage {
            id,
            message_id: new.message_id,
            chat_id: new.chat_id,
            content: new.content,
            timestamp: new.timestamp,
            user_id,
            message_type: new.message_type,
            created_at: now,
        }
    }

    fn validate_new(new: &NewSavedMessage) -> Result<(), ValidationError> {
        if new.message_id.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "messageId".to_string(),
            });
        }
        Ok(())
    }

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn view(&self) -> ResourceKind {
        message_view(self.message_type)
    }

    fn in_view(&self, view: ResourceKind) -> bool {
        message_view(self.message_type) == view
    }

    fn into_cached(items: Vec<Self>) -> CachedResource {
        CachedResource::SavedMessages(items)
    }

    fn from_cached(cached: CachedResource) -> Option<Vec<Self>> {
        match cached {
            CachedResource::SavedMessages(items) => Some(items),
            _ => None,
        }
    }
}

impl UserCollection for Prediction {
    type New = NewPrediction;
    type Update = PredictionUpdate;
    const KIND: ResourceKind = ResourceKind::Predictions;
    const VIEWS: &'static [ResourceKind] = &[ResourceKind::Predictions];

    fn build(new: NewPrediction, id: RecordId, user_id: UserId, now: Timestamp) -> Self {
        Prediction {
            id,
            user_id,
            features: new.features,
            prediction: new.outcome.prediction,
            confidence: new.outcome.confidence,
            probabilities: new.outcome.probabilities,
            timestamp: now,
        }
    }

    fn validate_new(new: &NewPrediction) -> Result<(), ValidationError> {
        new.features.validate()
    }

    fn id(&self) -> &RecordId {
        &self.id
    }

    /// Newest first.
    fn order(items: &mut [Self]) {
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    }

    fn into_cached(items: Vec<Self>) -> CachedResource {
        CachedResource::Predictions(items)
    }

    fn from_cached(cached: CachedResource) -> Option<Vec<Self>> {
        match cached {
            CachedResource::Predictions(items) => Some(items),
            _ => None,
        }
    }
}

// ============================================================================
// FEEDS
// ============================================================================

/// Decoding rules shared by one-shot reads and live subscriptions.
pub(crate) trait Feed: Send + Sync + 'static {
    type Item: Clone + Send + 'static;

    /// Cache name and registry topic.
    fn kind(&self) -> ResourceKind;

    fn from_cached(&self, cached: CachedResource) -> Option<Self::Item>;

    /// Emitted when nothing better is available.
    fn empty(&self) -> Self::Item;

    /// Decode a snapshot into the emitted value and, when it should be
    /// cached, the cache payload.
    fn decode(&self, snapshot: &Snapshot)
        -> Result<(Self::Item, Option<CachedResource>), StoreError>;
}

/// One view over a list collection.
pub(crate) struct ListFeed<T> {
    view: ResourceKind,
    _marker: PhantomData<fn() -> T>,
}

impl<T: UserCollection> ListFeed<T> {
    pub(crate) fn new(view: ResourceKind) -> Self {
        Self {
            view,
            _marker: PhantomData,
        }
    }
}

impl<T: UserCollection> Feed for ListFeed<T> {
    type Item = Vec<T>;

    fn kind(&self) -> ResourceKind {
        self.view
    }

    fn from_cached(&self, cached: CachedResource) -> Option<Vec<T>> {
        T::from_cached(cached)
    }

    fn empty(&self) -> Vec<T> {
        Vec::new()
    }

    fn decode(&self, snapshot: &Snapshot) -> Result<(Vec<T>, Option<CachedResource>), StoreError> {
        let mut items: Vec<T> = snapshot
            .decode_children()
            .into_iter()
            .filter_map(|(key, decoded)| match decoded {
                Ok(item) => Some(item),
                Err(err) => {
                    warn!(path = %snapshot.path(), key, error = %err, "skipping undecodable record");
                    None
                }
            })
            .collect();
        items.retain(|item| item.in_view(self.view));
        T::order(&mut items);
        Ok((items.clone(), Some(T::into_cached(items))))
    }
}

/// The user's profile record. Absent profiles are not cached.
pub(crate) struct ProfileFeed;

impl Feed for ProfileFeed {
    type Item = Option<Profile>;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Profile
    }

    fn from_cached(&self, cached: CachedResource) -> Option<Option<Profile>> {
        cached.into_profile().map(Some)
    }

    fn empty(&self) -> Option<Profile> {
        None
    }

    fn decode(
        &self,
        snapshot: &Snapshot,
    ) -> Result<(Option<Profile>, Option<CachedResource>), StoreError> {
        let profile: Option<Profile> = snapshot.decode()?;
        let cached = profile.clone().map(CachedResource::Profile);
        Ok((profile, cached))
    }
}
