use crate::error::AppResult;
use crate::models::canonical::presence_id;
use crate::models::TypingState;
use crate::store::{
    collections, decode, to_value, ChangeEvent, ChangeSubscription, DocumentStore, Filter, Merge,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Server-held typing indicators, bounded by a TTL.
///
/// Best-effort: a lost write only means an indicator shows or hides late,
/// and staleness never exceeds the TTL.
#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn DocumentStore>,
    ttl: Duration,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn DocumentStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Write failures are logged and swallowed.
    pub async fn set_typing(&self, chat_id: Uuid, user_id: Uuid, is_typing: bool) {
        if let Err(e) = self.write_typing(chat_id, user_id, is_typing).await {
            warn!(chat_id = %chat_id, user_id = %user_id, error = %e, "typing state write failed");
        }
    }

    async fn write_typing(&self, chat_id: Uuid, user_id: Uuid, is_typing: bool) -> AppResult<()> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::seconds(5));
        let expires_at = Utc::now() + ttl;

        let merge = Merge::new()
            .set("chatId", chat_id.to_string())
            .set("userId", user_id.to_string())
            .set("isTyping", is_typing)
            .set("expiresAt", to_value(&expires_at)?);
        self.store
            .merge(
                collections::PRESENCE,
                &presence_id(chat_id, user_id).to_string(),
                merge,
            )
            .await?;
        debug!(chat_id = %chat_id, user_id = %user_id, is_typing, "typing state written");
        Ok(())
    }

    /// Unexpired typing states of `chat_id`, ordered by user id.
    pub async fn typing_users(&self, chat_id: Uuid) -> AppResult<Vec<TypingState>> {
        let now = Utc::now();
        let mut active: Vec<TypingState> = load_states(self.store.as_ref(), chat_id)
            .await?
            .into_values()
            .filter(|state| state.is_active_at(now))
            .collect();
        active.sort_by_key(|state| state.user_id);
        Ok(active)
    }

    pub async fn subscribe(&self, chat_id: Uuid) -> AppResult<PresenceSubscription> {
        let changes = self
            .store
            .subscribe(
                collections::PRESENCE,
                vec![Filter::eq("chatId", chat_id.to_string())],
            )
            .await?;
        let states = load_states(self.store.as_ref(), chat_id).await?;

        Ok(PresenceSubscription {
            chat_id,
            store: self.store.clone(),
            changes,
            states,
            last_emitted: None,
        })
    }

    /// Delete every presence record of `chat_id`. Returns (deleted, failed).
    pub async fn clear_chat(&self, chat_id: Uuid) -> AppResult<(usize, usize)> {
        let rows = self
            .store
            .query(
                collections::PRESENCE,
                &[Filter::eq("chatId", chat_id.to_string())],
            )
            .await?;

        let (mut deleted, mut failed) = (0, 0);
        for (id, _) in rows {
            match self.store.delete(collections::PRESENCE, &id).await {
                Ok(_) => deleted += 1,
                Err(e) => {
                    warn!(chat_id = %chat_id, presence_id = %id, error = %e, "presence delete failed");
                    failed += 1;
                }
            }
        }
        Ok((deleted, failed))
    }

    /// Delete presence records past their TTL across all chats. Returns the
    /// number removed.
    ///
    /// A write racing the sweep can be removed with the stale record, which
    /// only hides that indicator early.
    pub async fn sweep_expired(&self) -> AppResult<usize> {
        let now = Utc::now();
        let rows = self.store.query(collections::PRESENCE, &[]).await?;

        let mut removed = 0;
        for (id, doc) in rows {
            let expired = match decode::<TypingState>(doc) {
                Ok(state) => state.expires_at <= now,
                Err(e) => {
                    warn!(presence_id = %id, error = %e, "skipping malformed presence record");
                    false
                }
            };
            if !expired {
                continue;
            }
            match self.store.delete(collections::PRESENCE, &id).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(presence_id = %id, error = %e, "expired presence delete failed"),
            }
        }

        if removed > 0 {
            debug!(removed, "expired presence records swept");
        }
        Ok(removed)
    }
}

async fn load_states(
    store: &dyn DocumentStore,
    chat_id: Uuid,
) -> AppResult<HashMap<String, TypingState>> {
    let rows = store
        .query(
            collections::PRESENCE,
            &[Filter::eq("chatId", chat_id.to_string())],
        )
        .await?;

    let mut states = HashMap::with_capacity(rows.len());
    for (id, doc) in rows {
        match decode::<TypingState>(doc) {
            Ok(state) => {
                states.insert(id, state);
            }
            Err(e) => warn!(presence_id = %id, error = %e, "skipping malformed presence record"),
        }
    }
    Ok(states)
}

/// Live set of users typing in one thread.
///
/// Emits whenever the set changes, including when an entry expires without
/// any new write.
pub struct PresenceSubscription {
    chat_id: Uuid,
    store: Arc<dyn DocumentStore>,
    changes: ChangeSubscription,
    /// Keyed by presence document id
    states: HashMap<String, TypingState>,
    last_emitted: Option<BTreeSet<Uuid>>,
}

impl PresenceSubscription {
    pub fn chat_id(&self) -> Uuid {
        self.chat_id
    }

    fn active_at(&self, now: DateTime<Utc>) -> BTreeSet<Uuid> {
        self.states
            .values()
            .filter(|state| state.is_active_at(now))
            .map(|state| state.user_id)
            .collect()
    }

    fn next_expiry(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.states
            .values()
            .filter(|state| state.is_active_at(now))
            .map(|state| state.expires_at)
            .min()
            .map(|at| {
                (at - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    .saturating_add(Duration::from_millis(1))
            })
    }

    /// Next distinct set of typing users, or `None` once cancelled.
    pub async fn next(&mut self) -> Option<Vec<Uuid>> {
        loop {
            if self.changes.is_cancelled() {
                return None;
            }

            let now = Utc::now();
            let active = self.active_at(now);
            if self.last_emitted.as_ref() != Some(&active) {
                self.last_emitted = Some(active.clone());
                return Some(active.into_iter().collect());
            }

            let wake = self.next_expiry(now);
            let expiry = async {
                match wake {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                event = self.changes.recv() => match event? {
                    ChangeEvent::Upserted { id, document } => match decode::<TypingState>(document) {
                        Ok(state) => {
                            self.states.insert(id, state);
                        }
                        Err(e) => warn!(presence_id = %id, error = %e, "ignoring malformed presence change"),
                    },
                    ChangeEvent::Removed { id } => {
                        self.states.remove(&id);
                    }
                    ChangeEvent::Resync => match load_states(self.store.as_ref(), self.chat_id).await {
                        Ok(states) => self.states = states,
                        Err(e) => warn!(chat_id = %self.chat_id, error = %e, "presence resync failed"),
                    },
                },
                _ = expiry => {}
            }
        }
    }

    pub fn cancel(&mut self) {
        self.changes.cancel();
    }

    pub fn into_stream(self) -> impl Stream<Item = Vec<Uuid>> + Send {
        stream::unfold(self, |mut sub| async move {
            let typing = sub.next().await?;
            Some((typing, sub))
        })
    }
}
