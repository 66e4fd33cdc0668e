//! In-process implementation of [`RemoteStore`].
//!
//! Holds a JSON tree and pushes snapshots to listeners whose path overlaps a
//! write. Paths can be denied to exercise permission failures, and errors can
//! be pushed into live listeners to exercise the push-layer error path.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use vitalsync_core::{new_record_id, RecordId, StoreError};

use crate::remote::{DataPath, RemoteStore, Snapshot, SnapshotStream};

type PushSender = mpsc::UnboundedSender<Result<Snapshot, StoreError>>;

struct Listener {
    path: DataPath,
    sender: PushSender,
}

#[derive(Default)]
struct StoreState {
    root: Map<String, Value>,
    listeners: Vec<Listener>,
    denied: Vec<DataPath>,
}

impl StoreState {
    fn value_at(&self, path: &DataPath) -> Option<Value> {
        let mut segments = path.segments().iter();
        let first = match segments.next() {
            Some(first) => first,
            None => return Some(Value::Object(self.root.clone())).filter(|_| !self.root.is_empty()),
        };
        let mut current = self.root.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current.clone())
    }

    fn write(&mut self, path: &DataPath, value: Option<Value>) {
        let value = value.filter(|v| !v.is_null() && !is_empty_object(v));
        match path.segments().split_last() {
            None => {
                self.root = match value {
                    Some(Value::Object(map)) => map,
                    _ => Map::new(),
                };
            }
            Some((last, parents)) => {
                write_into(&mut self.root, parents, last, value);
            }
        }
    }

    fn is_denied(&self, path: &DataPath) -> bool {
        self.denied.iter().any(|denied| denied.overlaps(path))
    }

    fn notify(&mut self, changed: &DataPath) {
        self.listeners.retain(|listener| !listener.sender.is_closed());
        let mut deliveries = Vec::new();
        for listener in &self.listeners {
            if listener.path.overlaps(changed) {
                let snapshot = Snapshot::new(listener.path.clone(), self.value_at(&listener.path));
                deliveries.push((listener.sender.clone(), snapshot));
            }
        }
        for (sender, snapshot) in deliveries {
            trace!(path = %snapshot.path(), "pushing snapshot");
            let _ = sender.send(Ok(snapshot));
        }
    }
}

fn is_empty_object(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.is_empty())
}

/// Write `value` at `parents/last` below `node`, creating intermediate
/// objects and pruning ones left empty.
fn write_into(node: &mut Map<String, Value>, parents: &[String], last: &str, value: Option<Value>) {
    match parents.split_first() {
        None => match value {
            Some(value) => {
                node.insert(last.to_string(), value);
            }
            None => {
                node.remove(last);
            }
        },
        Some((head, rest)) => {
            if value.is_none() && !node.contains_key(head) {
                return;
            }
            let entry = node
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(child) = entry {
                write_into(child, rest, last, value);
                if child.is_empty() {
                    node.remove(head);
                }
            }
        }
    }
}

/// A complete in-memory datastore with live listeners. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryRemoteStore {
    state: Arc<Mutex<StoreState>>,
}

impl std::fmt::Debug for InMemoryRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("InMemoryRemoteStore")
            .field("listeners", &state.listeners.len())
            .field("denied", &state.denied)
            .finish()
    }
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deny every operation on `path` and anything above or below it.
    /// Live listeners on an overlapping path receive a permission error.
    pub fn deny(&self, path: DataPath) {
        let mut state = self.lock();
        let err = StoreError::PermissionDenied {
            path: path.to_string(),
        };
        state.listeners.retain(|listener| {
            if listener.path.overlaps(&path) {
                let _ = listener.sender.send(Err(err.clone()));
                false
            } else {
                true
            }
        });
        state.denied.push(path);
    }

    pub fn allow_all(&self) {
        self.lock().denied.clear();
    }

    /// Deliver `err` to every listener on an overlapping path and detach them.
    pub fn push_error(&self, path: &DataPath, err: StoreError) -> usize {
        let mut state = self.lock();
        let before = state.listeners.len();
        state.listeners.retain(|listener| {
            if listener.path.overlaps(path) {
                let _ = listener.sender.send(Err(err.clone()));
                false
            } else {
                true
            }
        });
        before - state.listeners.len()
    }

    /// Number of attached listeners whose consumer is still alive.
    pub fn listener_count(&self) -> usize {
        let mut state = self.lock();
        state.listeners.retain(|listener| !listener.sender.is_closed());
        state.listeners.len()
    }

    /// Current value at `path`, bypassing access rules.
    pub fn value_at(&self, path: &DataPath) -> Option<Value> {
        self.lock().value_at(path)
    }

    fn check_access(state: &StoreState, path: &DataPath) -> Result<(), StoreError> {
        if state.is_denied(path) {
            debug!(path = %path, "access denied");
            return Err(StoreError::PermissionDenied {
                path: path.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn read_once(&self, path: &DataPath) -> Result<Snapshot, StoreError> {
        let state = self.lock();
        Self::check_access(&state, path)?;
        Ok(Snapshot::new(path.clone(), state.value_at(path)))
    }

    fn listen(&self, path: &DataPath) -> SnapshotStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        {
            let mut state = self.lock();
            match Self::check_access(&state, path) {
                Err(err) => {
                    let _ = sender.send(Err(err));
                }
                Ok(()) => {
                    let _ = sender.send(Ok(Snapshot::new(path.clone(), state.value_at(path))));
                    state.listeners.push(Listener {
                        path: path.clone(),
                        sender,
                    });
                }
            }
        }
        debug!(path = %path, "listener attached");
        stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|item| (item, receiver))
        })
        .boxed()
    }

    fn allocate_key(&self, _path: &DataPath) -> RecordId {
        new_record_id()
    }

    async fn set(&self, path: &DataPath, value: Value) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check_access(&state, path)?;
        state.write(path, Some(value));
        state.notify(path);
        Ok(())
    }

    async fn update(&self, path: &DataPath, fields: Value) -> Result<(), StoreError> {
        let fields = match fields {
            Value::Object(fields) => fields,
            other => {
                return Err(StoreError::Malformed {
                    path: path.to_string(),
                    reason: format!("update expects an object, got {other}"),
                })
            }
        };
        let mut state = self.lock();
        Self::check_access(&state, path)?;
        let mut merged = match state.value_at(path) {
            Some(Value::Object(existing)) => existing,
            _ => Map::new(),
        };
        for (key, value) in fields {
            if value.is_null() {
                merged.remove(&key);
            } else {
                merged.insert(key, value);
            }
        }
        state.write(path, Some(Value::Object(merged)));
        state.notify(path);
        Ok(())
    }

    async fn remove(&self, path: &DataPath) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check_access(&state, path)?;
        state.write(path, None);
        state.notify(path);
        Ok(())
    }
}
