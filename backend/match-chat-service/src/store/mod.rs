//! # Document store boundary
//!
//! The persisted store is an external collaborator. The core only relies on
//! four primitives over logical collections: point get, per-document atomic
//! merge, field-filtered query, and a realtime change subscription with
//! explicit cancellation. Every write the core issues is a [`Merge`] built
//! from commutative field operations (set-union, increment, max, server
//! timestamp), so concurrent writers converge without in-process locks.
//!
//! [`memory::MemoryStore`] is the in-process implementation used by the
//! binary and the test suite.

pub mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::AbortHandle;

pub use memory::{Fault, FaultOp, MemoryStore};

/// Logical collection names
pub mod collections {
    pub const INTERESTS: &str = "interests";
    /// Secondary index: one document per event listing interested users
    pub const EVENT_INTERESTS: &str = "event_interests";
    pub const MATCHES: &str = "matches";
    pub const CHATS: &str = "chats";
    pub const MESSAGES: &str = "messages";
    pub const PRESENCE: &str = "presence";
}

pub type Document = Map<String, Value>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("index unavailable for collection {0}")]
    IndexUnavailable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("merge rejected: {0}")]
    Conflict(String),

    #[error("precondition failed on {collection}/{id}")]
    PreconditionFailed { collection: String, id: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Field-level operation applied atomically inside a [`Merge`].
///
/// Paths are dot-separated (`unreadCount.<user>`); missing parents are created.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Set(Value),
    /// Write only when the field is absent
    SetIfAbsent(Value),
    /// Append each value not already present in the array
    ArrayUnion(Vec<Value>),
    Increment(i64),
    /// Keep the larger of the stored and given integer
    Max(i64),
    /// `max(now_micros, stored + 1)`, strictly increasing per document
    ServerTimestamp,
    Delete,
}

/// A single-document merge: field operations plus optional guards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Merge {
    ops: Vec<(String, FieldOp)>,
    precondition: Option<(String, Value)>,
    require_existing: bool,
}

impl Merge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.op(path, FieldOp::Set(value.into()))
    }

    /// `Set` every top-level field of `document`.
    pub fn set_document(self, document: Document) -> Self {
        document
            .into_iter()
            .fold(self, |merge, (field, value)| merge.set(field, value))
    }

    pub fn set_if_absent(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.op(path, FieldOp::SetIfAbsent(value.into()))
    }

    pub fn array_union(self, path: impl Into<String>, values: Vec<Value>) -> Self {
        self.op(path, FieldOp::ArrayUnion(values))
    }

    pub fn increment(self, path: impl Into<String>, by: i64) -> Self {
        self.op(path, FieldOp::Increment(by))
    }

    pub fn max(self, path: impl Into<String>, value: i64) -> Self {
        self.op(path, FieldOp::Max(value))
    }

    pub fn server_timestamp(self, path: impl Into<String>) -> Self {
        self.op(path, FieldOp::ServerTimestamp)
    }

    pub fn delete(self, path: impl Into<String>) -> Self {
        self.op(path, FieldOp::Delete)
    }

    /// Reject the merge with [`StoreError::PreconditionFailed`] unless `path == expected`.
    pub fn when(mut self, path: impl Into<String>, expected: impl Into<Value>) -> Self {
        self.precondition = Some((path.into(), expected.into()));
        self
    }

    /// Fail with `Ok(None)` from [`DocumentStore::merge`] instead of creating the document.
    pub fn require_existing(mut self) -> Self {
        self.require_existing = true;
        self
    }

    fn op(mut self, path: impl Into<String>, op: FieldOp) -> Self {
        self.ops.push((path.into(), op));
        self
    }

    pub fn ops(&self) -> &[(String, FieldOp)] {
        &self.ops
    }

    pub fn precondition(&self) -> Option<&(String, Value)> {
        self.precondition.as_ref()
    }

    pub fn requires_existing(&self) -> bool {
        self.require_existing
    }
}

/// Result of an applied merge: the document after the merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub document: Document,
    /// The merge created the document
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    ArrayContains(String, Value),
}

impl Filter {
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(path.into(), value.into())
    }

    pub fn array_contains(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::ArrayContains(path.into(), value.into())
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::Eq(path, expected) => lookup(doc, path) == Some(expected),
            Filter::ArrayContains(path, expected) => lookup(doc, path)
                .and_then(Value::as_array)
                .map(|items| items.contains(expected))
                .unwrap_or(false),
        }
    }
}

pub fn matches_all(filters: &[Filter], doc: &Document) -> bool {
    filters.iter().all(|f| f.matches(doc))
}

/// Change notification delivered to a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// Document created or updated and matches the subscription filters
    Upserted { id: String, document: Document },
    /// Document deleted, or updated so that it no longer matches
    Removed { id: String },
    /// Notifications were dropped; the consumer must re-query
    Resync,
}

/// Live change feed for one collection; dropping it cancels the feed.
pub struct ChangeSubscription {
    rx: UnboundedReceiver<ChangeEvent>,
    forwarder: Option<AbortHandle>,
    cancelled: bool,
}

impl ChangeSubscription {
    pub fn new(rx: UnboundedReceiver<ChangeEvent>, forwarder: Option<AbortHandle>) -> Self {
        Self {
            rx,
            forwarder,
            cancelled: false,
        }
    }

    /// Next change, or `None` once cancelled or the store closed the feed.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        if self.cancelled {
            return None;
        }
        self.rx.recv().await
    }

    /// Stop delivery. Buffered notifications are discarded.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        if let Some(handle) = self.forwarder.take() {
            handle.abort();
        }
        self.rx.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        if let Some(handle) = self.forwarder.take() {
            handle.abort();
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Apply `merge` atomically. Returns `Ok(None)` when the merge requires an
    /// existing document and there is none.
    async fn merge(
        &self,
        collection: &str,
        id: &str,
        merge: Merge,
    ) -> Result<Option<MergeOutcome>, StoreError>;

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> Result<Vec<(String, Document)>, StoreError>;

    /// Returns whether a document was removed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    async fn subscribe(
        &self,
        collection: &str,
        filters: Vec<Filter>,
    ) -> Result<ChangeSubscription, StoreError>;
}

/// Resolve a dot-separated path inside a document.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

pub fn encode<T: Serialize>(value: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(StoreError::Serialization(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(StoreError::Serialization(e.to_string())),
    }
}

pub fn decode<T: DeserializeOwned>(document: Document) -> Result<T, StoreError> {
    serde_json::from_value(Value::Object(document))
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Serialize any serde value (ids, enums, timestamps) into a field value.
pub fn to_value<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}
