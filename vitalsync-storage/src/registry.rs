//! Registry of live-listener handles keyed by (topic, user).

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};
use vitalsync_core::{ResourceKind, UserId};

/// Registry key, rendered as `<topic>:<user_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandleKey {
    topic: String,
    user_id: UserId,
}

impl HandleKey {
    pub fn new(topic: impl Into<String>, user_id: &UserId) -> Self {
        Self {
            topic: topic.into(),
            user_id: user_id.clone(),
        }
    }

    pub fn for_resource(kind: ResourceKind, user_id: &UserId) -> Self {
        Self::new(kind.topic(), user_id)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }
}

impl fmt::Display for HandleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.user_id)
    }
}

type CancelFn = Box<dyn FnOnce() + Send>;

struct CancelInner {
    cancelled: AtomicBool,
    action: Mutex<Option<CancelFn>>,
    parts: Vec<CancelHandle>,
}

/// A shareable cancel action that runs at most once across all clones.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

impl CancelHandle {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                action: Mutex::new(Some(Box::new(action))),
                parts: Vec::new(),
            }),
        }
    }

    /// One handle that cancels every handle in `parts`.
    ///
    /// It also reports cancelled once each part has been cancelled on its
    /// own, so the registry can prune it.
    pub fn joined(parts: impl IntoIterator<Item = CancelHandle>) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                action: Mutex::new(None),
                parts: parts.into_iter().collect(),
            }),
        }
    }

    /// A handle with nothing to tear down.
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    /// Run the cancel action. Returns `true` only for the call that ran it.
    pub fn cancel(&self) -> bool {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        let action = self
            .inner
            .action
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(action) = action {
            action();
        }
        for part in &self.inner.parts {
            part.cancel();
        }
        true
    }

    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        !self.inner.parts.is_empty() && self.inner.parts.iter().all(CancelHandle::is_cancelled)
    }

    /// Whether `other` is this handle or is joined into it.
    pub fn covers(&self, other: &CancelHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || self.inner.parts.iter().any(|part| part.covers(other))
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Owns the cancel handles of active subscriptions until cleanup.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    handles: Mutex<HashMap<HandleKey, CancelHandle>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<HandleKey, CancelHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `handle` under `key`.
    ///
    /// A handle already stored under the key is displaced and returned
    /// without being cancelled. Handles cancelled elsewhere are pruned first.
    pub fn register(&self, key: HandleKey, handle: CancelHandle) -> Option<CancelHandle> {
        let mut handles = self.lock();
        let before = handles.len();
        handles.retain(|_, existing| !existing.is_cancelled());
        let pruned = before - handles.len();
        if pruned > 0 {
            debug!(pruned, "pruned cancelled subscription handles");
        }
        debug!(key = %key, "registering subscription handle");
        handles.insert(key, handle)
    }

    /// Cancel and remove handles for `user_id`, or every handle when `None`.
    ///
    /// Returns the number of handles removed.
    pub fn cleanup(&self, user_id: Option<&UserId>) -> usize {
        let drained: Vec<(HandleKey, CancelHandle)> = {
            let mut handles = self.lock();
            match user_id {
                Some(user_id) => {
                    let keys: Vec<HandleKey> = handles
                        .keys()
                        .filter(|key| key.user_id() == user_id)
                        .cloned()
                        .collect();
                    keys.into_iter()
                        .filter_map(|key| handles.remove_entry(&key))
                        .collect()
                }
                None => handles.drain().collect(),
            }
        };

        for (key, handle) in &drained {
            if handle.cancel() {
                debug!(key = %key, "subscription cancelled");
            }
        }
        info!(
            user_id = user_id.map(UserId::as_str).unwrap_or("*"),
            removed = drained.len(),
            "subscription cleanup"
        );
        drained.len()
    }

    pub fn contains(&self, key: &HandleKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
