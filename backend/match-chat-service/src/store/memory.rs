use super::{
    lookup, matches_all, ChangeEvent, ChangeSubscription, Document, DocumentStore, FieldOp,
    Filter, Merge, MergeOutcome, StoreError,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, warn};

const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Which primitive an injected fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    /// get, query and subscribe
    Read,
    /// merge and delete
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    IndexUnavailable,
    Network,
    Conflict,
}

impl Fault {
    fn to_error(self, collection: &str) -> StoreError {
        match self {
            Fault::IndexUnavailable => StoreError::IndexUnavailable(collection.to_string()),
            Fault::Network => StoreError::Network(format!("injected failure on {collection}")),
            Fault::Conflict => StoreError::Conflict(format!("injected conflict on {collection}")),
        }
    }
}

#[derive(Debug, Clone)]
struct FaultRule {
    collection: String,
    id: Option<String>,
    op: FaultOp,
    fault: Fault,
    /// `None` fails forever
    remaining: Option<usize>,
}

#[derive(Debug, Clone)]
struct StoredChange {
    collection: String,
    id: String,
    previous: Option<Document>,
    current: Option<Document>,
}

/// In-process document store.
///
/// Each merge runs under the collection map's write lock, which gives the
/// per-document atomicity the core relies on. Changes are fanned out over a
/// broadcast channel; a subscriber that falls behind receives
/// [`ChangeEvent::Resync`].
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Document>>>,
    faults: Mutex<Vec<FaultRule>>,
    changes: broadcast::Sender<StoredChange>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }

    pub fn with_feed_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            collections: RwLock::new(HashMap::new()),
            faults: Mutex::new(Vec::new()),
            changes,
        }
    }

    /// Fail reads on `collection`; `times = None` fails until cleared.
    pub async fn fail_reads(&self, collection: &str, fault: Fault, times: Option<usize>) {
        self.push_fault(collection, None, FaultOp::Read, fault, times)
            .await;
    }

    pub async fn fail_writes(&self, collection: &str, fault: Fault, times: Option<usize>) {
        self.push_fault(collection, None, FaultOp::Write, fault, times)
            .await;
    }

    /// Fail one document only.
    pub async fn fail_document(
        &self,
        collection: &str,
        id: &str,
        op: FaultOp,
        fault: Fault,
        times: Option<usize>,
    ) {
        self.push_fault(collection, Some(id.to_string()), op, fault, times)
            .await;
    }

    pub async fn clear_faults(&self) {
        self.faults.lock().await.clear();
    }

    /// Number of documents currently stored in `collection`.
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    async fn push_fault(
        &self,
        collection: &str,
        id: Option<String>,
        op: FaultOp,
        fault: Fault,
        times: Option<usize>,
    ) {
        self.faults.lock().await.push(FaultRule {
            collection: collection.to_string(),
            id,
            op,
            fault,
            remaining: times,
        });
    }

    async fn check_fault(
        &self,
        collection: &str,
        id: Option<&str>,
        op: FaultOp,
    ) -> Result<(), StoreError> {
        let mut faults = self.faults.lock().await;
        let hit = faults.iter_mut().position(|rule| {
            rule.collection == collection
                && rule.op == op
                && match (&rule.id, id) {
                    (None, _) => true,
                    (Some(rule_id), Some(id)) => rule_id == id,
                    (Some(_), None) => false,
                }
                && rule.remaining != Some(0)
        });

        let Some(index) = hit else {
            return Ok(());
        };

        let fault = faults[index].fault;
        if let Some(remaining) = faults[index].remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                faults.remove(index);
            }
        }
        debug!(collection, ?op, ?fault, "injected store fault");
        Err(fault.to_error(collection))
    }

    fn publish(&self, change: StoredChange) {
        // No receivers is not an error
        let _ = self.changes.send(change);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.check_fault(collection, Some(id), FaultOp::Read).await?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn merge(
        &self,
        collection: &str,
        id: &str,
        merge: Merge,
    ) -> Result<Option<MergeOutcome>, StoreError> {
        self.check_fault(collection, Some(id), FaultOp::Write)
            .await?;

        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        let previous = docs.get(id).cloned();

        if previous.is_none() && merge.requires_existing() {
            return Ok(None);
        }

        if let Some((path, expected)) = merge.precondition() {
            let actual = previous.as_ref().and_then(|doc| lookup(doc, path));
            if actual != Some(expected) {
                return Err(StoreError::PreconditionFailed {
                    collection: collection.to_string(),
                    id: id.to_string(),
                });
            }
        }

        let mut document = previous.clone().unwrap_or_default();
        for (path, op) in merge.ops() {
            apply_op(&mut document, path, op)?;
        }

        docs.insert(id.to_string(), document.clone());
        let created = previous.is_none();
        self.publish(StoredChange {
            collection: collection.to_string(),
            id: id.to_string(),
            previous,
            current: Some(document.clone()),
        });

        Ok(Some(MergeOutcome { document, created }))
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> Result<Vec<(String, Document)>, StoreError> {
        self.check_fault(collection, None, FaultOp::Read).await?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, doc)| matches_all(filters, doc))
                    .map(|(id, doc)| (id.clone(), doc.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        self.check_fault(collection, Some(id), FaultOp::Write)
            .await?;

        let mut collections = self.collections.write().await;
        let removed = collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id));

        match removed {
            Some(previous) => {
                self.publish(StoredChange {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    previous: Some(previous),
                    current: None,
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn subscribe(
        &self,
        collection: &str,
        filters: Vec<Filter>,
    ) -> Result<ChangeSubscription, StoreError> {
        self.check_fault(collection, None, FaultOp::Read).await?;

        let mut feed = self.changes.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let collection = collection.to_string();

        let forwarder = tokio::spawn(async move {
            loop {
                let event = match feed.recv().await {
                    Ok(change) if change.collection == collection => {
                        match classify(&filters, change) {
                            Some(event) => event,
                            None => continue,
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(collection = %collection, skipped, "change feed lagged");
                        ChangeEvent::Resync
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if tx.send(event).is_err() {
                    break;
                }
            }
        });

        Ok(ChangeSubscription::new(rx, Some(forwarder.abort_handle())))
    }
}

fn classify(filters: &[Filter], change: StoredChange) -> Option<ChangeEvent> {
    let was_visible = change
        .previous
        .as_ref()
        .map(|doc| matches_all(filters, doc))
        .unwrap_or(false);

    match change.current {
        Some(document) if matches_all(filters, &document) => Some(ChangeEvent::Upserted {
            id: change.id,
            document,
        }),
        _ if was_visible => Some(ChangeEvent::Removed { id: change.id }),
        _ => None,
    }
}

fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

fn apply_op(doc: &mut Document, path: &str, op: &FieldOp) -> Result<(), StoreError> {
    match op {
        FieldOp::Set(value) => {
            *slot(doc, path)? = Some(value.clone());
        }
        FieldOp::SetIfAbsent(value) => {
            let mut field = slot(doc, path)?;
            if field.is_none() {
                *field = Some(value.clone());
            }
        }
        FieldOp::ArrayUnion(values) => {
            let mut field = slot(doc, path)?;
            let mut items = match field.take() {
                Some(Value::Array(items)) => items,
                None | Some(Value::Null) => Vec::new(),
                Some(other) => {
                    return Err(StoreError::Conflict(format!(
                        "array union on non-array field {path}: {other}"
                    )))
                }
            };
            for value in values {
                if !items.contains(value) {
                    items.push(value.clone());
                }
            }
            *field = Some(Value::Array(items));
        }
        FieldOp::Increment(by) => {
            let mut field = slot(doc, path)?;
            let current = integer_at(field.as_ref(), path)?.unwrap_or(0);
            *field = Some(Value::from(current.saturating_add(*by)));
        }
        FieldOp::Max(value) => {
            let mut field = slot(doc, path)?;
            let current = integer_at(field.as_ref(), path)?;
            let next = current.map_or(*value, |c| c.max(*value));
            *field = Some(Value::from(next));
        }
        FieldOp::ServerTimestamp => {
            let mut field = slot(doc, path)?;
            let previous = integer_at(field.as_ref(), path)?;
            let now = now_micros();
            let next = previous.map_or(now, |p| now.max(p.saturating_add(1)));
            *field = Some(Value::from(next));
        }
        FieldOp::Delete => {
            remove_path(doc, path);
        }
    }
    Ok(())
}

fn integer_at(value: Option<&Value>, path: &str) -> Result<Option<i64>, StoreError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| StoreError::Conflict(format!("numeric op on non-integer field {path}"))),
    }
}

/// Mutable handle to the field at `path`, creating parent objects as needed.
///
/// The returned `Option` is `None` when the field is absent; assigning
/// `Some` writes it.
fn slot<'a>(doc: &'a mut Document, path: &str) -> Result<FieldSlot<'a>, StoreError> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(leaf) = segments.pop() else {
        return Err(StoreError::Conflict("empty field path".into()));
    };

    let mut current = doc;
    for segment in segments {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if entry.is_null() {
            *entry = Value::Object(Map::new());
        }
        current = entry
            .as_object_mut()
            .ok_or_else(|| StoreError::Conflict(format!("{segment} in {path} is not an object")))?;
    }

    Ok(FieldSlot::new(current, leaf))
}

fn remove_path(doc: &mut Document, path: &str) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(leaf) = segments.pop() else {
        return;
    };
    let mut current = doc;
    for segment in segments {
        match current.get_mut(segment).and_then(Value::as_object_mut) {
            Some(next) => current = next,
            None => return,
        }
    }
    current.remove(leaf);
}

/// Write-back wrapper so field ops can treat absent and present fields alike.
struct FieldSlot<'a> {
    parent: &'a mut Document,
    key: String,
    value: Option<Value>,
}

impl<'a> FieldSlot<'a> {
    fn new(parent: &'a mut Document, key: &str) -> Self {
        let value = parent.remove(key);
        Self {
            parent,
            key: key.to_string(),
            value,
        }
    }
}

impl std::ops::Deref for FieldSlot<'_> {
    type Target = Option<Value>;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl std::ops::DerefMut for FieldSlot<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.value
    }
}

impl Drop for FieldSlot<'_> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.parent.insert(self.key.clone(), value);
        }
    }
}
