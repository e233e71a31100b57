//! Ordered, reconciling view over a chat thread's messages.
//!
//! Change notifications may arrive out of order, twice, or race a client's
//! own optimistic insert. The view is keyed by message id and always
//! rendered sorted by `(timestamp, id)`, so applying the same set of
//! changes in any order yields the same snapshot.

use crate::error::AppResult;
use crate::models::Message;
use crate::store::{collections, decode, ChangeEvent, ChangeSubscription, DocumentStore, Filter};
use futures::stream::{self, Stream};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Default, Clone)]
pub struct MessageView {
    ordered: BTreeMap<(i64, Uuid), Message>,
    keys: HashMap<Uuid, (i64, Uuid)>,
}

impl MessageView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        let mut view = Self::new();
        view.replace_all(messages);
        view
    }

    /// Insert or replace by id. Returns whether the view changed.
    pub fn upsert(&mut self, message: Message) -> bool {
        let key = message.order_key();
        if let Some(old_key) = self.keys.insert(message.id, key) {
            if self.ordered.get(&old_key) == Some(&message) {
                return false;
            }
            self.ordered.remove(&old_key);
        }
        self.ordered.insert(key, message);
        true
    }

    pub fn remove(&mut self, message_id: Uuid) -> Option<Message> {
        let key = self.keys.remove(&message_id)?;
        self.ordered.remove(&key)
    }

    pub fn replace_all(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.ordered.clear();
        self.keys.clear();
        for message in messages {
            self.upsert(message);
        }
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.ordered.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Every message of `chat_id`, sorted by `(timestamp, id)`.
pub(crate) async fn load_messages(
    store: &dyn DocumentStore,
    chat_id: Uuid,
) -> AppResult<Vec<Message>> {
    let rows = store
        .query(
            collections::MESSAGES,
            &[Filter::eq("chatId", chat_id.to_string())],
        )
        .await?;

    let mut messages = Vec::with_capacity(rows.len());
    for (id, doc) in rows {
        match decode::<Message>(doc) {
            Ok(message) => messages.push(message),
            Err(e) => warn!(message_id = %id, error = %e, "skipping malformed message"),
        }
    }
    messages.sort_by_key(Message::order_key);
    Ok(messages)
}

/// Live subscription yielding the full ordered message list of one thread.
///
/// The first [`next`](Self::next) returns the current state; each later one
/// returns after a change altered the view. Dropping or cancelling the
/// subscription stops delivery.
pub struct MessageSubscription {
    chat_id: Uuid,
    store: Arc<dyn DocumentStore>,
    changes: ChangeSubscription,
    view: MessageView,
    initial_pending: bool,
}

impl MessageSubscription {
    /// Subscribes before loading so no change between the two is missed.
    pub(crate) async fn open(store: Arc<dyn DocumentStore>, chat_id: Uuid) -> AppResult<Self> {
        let changes = store
            .subscribe(
                collections::MESSAGES,
                vec![Filter::eq("chatId", chat_id.to_string())],
            )
            .await?;
        let view = MessageView::from_messages(load_messages(store.as_ref(), chat_id).await?);

        Ok(Self {
            chat_id,
            store,
            changes,
            view,
            initial_pending: true,
        })
    }

    pub fn chat_id(&self) -> Uuid {
        self.chat_id
    }

    pub async fn next(&mut self) -> Option<Vec<Message>> {
        if self.changes.is_cancelled() {
            return None;
        }
        if self.initial_pending {
            self.initial_pending = false;
            return Some(self.view.snapshot());
        }

        loop {
            let changed = match self.changes.recv().await? {
                ChangeEvent::Upserted { id, document } => match decode::<Message>(document) {
                    Ok(message) => self.view.upsert(message),
                    Err(e) => {
                        warn!(message_id = %id, error = %e, "ignoring malformed message change");
                        false
                    }
                },
                ChangeEvent::Removed { id } => Uuid::parse_str(&id)
                    .ok()
                    .and_then(|id| self.view.remove(id))
                    .is_some(),
                ChangeEvent::Resync => match load_messages(self.store.as_ref(), self.chat_id).await {
                    Ok(messages) => {
                        debug!(chat_id = %self.chat_id, "message view resynced");
                        self.view.replace_all(messages);
                        true
                    }
                    Err(e) => {
                        warn!(chat_id = %self.chat_id, error = %e, "message view resync failed");
                        false
                    }
                },
            };

            if changed {
                return Some(self.view.snapshot());
            }
        }
    }

    /// Stop delivery; later calls to `next` return `None`.
    pub fn cancel(&mut self) {
        self.changes.cancel();
    }

    pub fn into_stream(self) -> impl Stream<Item = Vec<Message>> + Send {
        stream::unfold(self, |mut sub| async move {
            let snapshot = sub.next().await?;
            Some((snapshot, sub))
        })
    }
}
