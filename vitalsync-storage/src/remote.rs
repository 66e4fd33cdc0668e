//! Seam to the remote, path-addressed, push-capable datastore.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use vitalsync_core::{RecordId, ResourceKind, StoreError, UserId};

/// Slash-separated location in the remote tree, e.g. `reminders/<uid>/<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataPath {
    segments: Vec<String>,
}

impl DataPath {
    /// Parse a slash-separated path. Empty segments are dropped.
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// `users/<uid>` for the profile, `<collection>/<uid>` otherwise.
    pub fn user_collection(kind: ResourceKind, user_id: &UserId) -> Self {
        Self::root()
            .child(kind.collection_root())
            .child(user_id.as_str())
    }

    pub fn user_record(kind: ResourceKind, user_id: &UserId, id: &RecordId) -> Self {
        Self::user_collection(kind, user_id).child(id.as_str())
    }

    pub fn child(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, init) = self.segments.split_last()?;
        Some(Self {
            segments: init.to_vec(),
        })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Whether `self` equals `other` or lies above it in the tree.
    pub fn is_ancestor_or_self(&self, other: &DataPath) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// Whether a change at either path is visible at the other.
    pub fn overlaps(&self, other: &DataPath) -> bool {
        self.is_ancestor_or_self(other) || other.is_ancestor_or_self(self)
    }
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// Value at a path at one moment. `None` means nothing is stored there.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    path: DataPath,
    value: Option<Value>,
}

impl Snapshot {
    pub fn new(path: DataPath, value: Option<Value>) -> Self {
        let value = value.filter(|v| !v.is_null());
        Self { path, value }
    }

    pub fn absent(path: DataPath) -> Self {
        Self { path, value: None }
    }

    pub fn path(&self) -> &DataPath {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<Value> {
        self.value
    }

    /// Child keys and values in key order. Empty unless the value is an object.
    pub fn children(&self) -> Vec<(&str, &Value)> {
        match &self.value {
            Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.as_str(), v)).collect(),
            _ => Vec::new(),
        }
    }

    /// Decode the whole value. Absent snapshots decode to `None`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Option<T>, StoreError> {
        match &self.value {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|err| self.malformed(err)),
        }
    }

    /// Decode each child as a record, taking its `id` from the child key.
    ///
    /// Children decode independently, so one malformed record does not hide
    /// its siblings. Errors name the child's path.
    pub fn decode_children<T: DeserializeOwned>(&self) -> Vec<(&str, Result<T, StoreError>)> {
        self.children()
            .into_iter()
            .map(|(key, value)| {
                let mut value = value.clone();
                if let Value::Object(map) = &mut value {
                    map.insert("id".to_string(), Value::String(key.to_string()));
                }
                let decoded = serde_json::from_value(value).map_err(|err| StoreError::Malformed {
                    path: self.path.clone().child(key).to_string(),
                    reason: err.to_string(),
                });
                (key, decoded)
            })
            .collect()
    }

    fn malformed(&self, err: serde_json::Error) -> StoreError {
        StoreError::Malformed {
            path: self.path.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Snapshots pushed by a live listener. The first item is the current value;
/// an `Err` item ends the stream.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = Result<Snapshot, StoreError>> + Send>>;

/// A hierarchical, path-addressed datastore that can push changes.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn read_once(&self, path: &DataPath) -> Result<Snapshot, StoreError>;

    /// Attach a live listener. Dropping the stream detaches it.
    fn listen(&self, path: &DataPath) -> SnapshotStream;

    /// Allocate a fresh, time-ordered child key under `path`.
    fn allocate_key(&self, path: &DataPath) -> RecordId;

    async fn set(&self, path: &DataPath, value: Value) -> Result<(), StoreError>;

    /// Merge the top-level fields of `fields` into the object at `path`.
    async fn update(&self, path: &DataPath, fields: Value) -> Result<(), StoreError>;

    async fn remove(&self, path: &DataPath) -> Result<(), StoreError>;
}
