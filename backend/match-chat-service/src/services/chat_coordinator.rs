//! # Chat coordination
//!
//! One thread per participant pair, keyed by the canonical chat id so
//! concurrent opens converge without coordination.
//!
//! Ordering and unread counters are maintained by a single merge on the
//! thread document per send: a server timestamp (`max(now, previous + 1)`)
//! and an increment for every non-sender. The message document is written
//! afterwards with that timestamp; if that write fails the increments are
//! compensated.

use crate::error::{AppError, AppResult};
use crate::metrics::MESSAGES_SENT_TOTAL;
use crate::models::{ChatThread, MatchRecord, Message, ParticipantPair, TypingState};
use crate::services::match_discovery::expire_match_record;
use crate::services::message_view::{load_messages, MessageSubscription};
use crate::services::notification::{fire_and_forget, NotificationDispatcher, NotificationEvent};
use crate::services::presence_tracker::{PresenceSubscription, PresenceTracker};
use crate::services::retry_transient;
use crate::store::{collections, decode, encode, lookup, to_value, DocumentStore, Merge};
use chrono::Utc;
use resilience::RetryConfig;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DEFAULT_MAX_MESSAGE_LENGTH: usize = 4000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteChatReport {
    pub chat_id: Uuid,
    pub messages_deleted: usize,
    pub messages_failed: usize,
    pub presence_cleared: usize,
    pub match_expired: bool,
}

pub struct ChatCoordinator {
    store: Arc<dyn DocumentStore>,
    presence: PresenceTracker,
    notifier: Arc<dyn NotificationDispatcher>,
    retry: RetryConfig,
    max_message_length: usize,
}

fn unread_path(user_id: Uuid) -> String {
    format!("unreadCount.{user_id}")
}

impl ChatCoordinator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        presence: PresenceTracker,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            presence,
            notifier,
            retry: RetryConfig::default(),
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_message_length(mut self, max_message_length: usize) -> Self {
        self.max_message_length = max_message_length;
        self
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Find or create the thread for `participants`, attached to `match_id`.
    ///
    /// Idempotent: every caller for the same pair gets the same chat id.
    pub async fn create_or_get_chat(
        &self,
        requester: Uuid,
        participants: ParticipantPair,
        match_id: Uuid,
    ) -> AppResult<Uuid> {
        if !participants.contains(requester) {
            return Err(AppError::NotAuthorized);
        }

        let record = self.load_match(match_id).await?;
        if record.participants != participants {
            warn!(match_id = %match_id, requester = %requester, "chat participants do not match the match record");
            return Err(AppError::NotAuthorized);
        }
        if !record.status.is_open() {
            return Err(AppError::NotAuthorized);
        }

        let chat_id = participants.chat_id();
        let chat_key = chat_id.to_string();
        let participants_value = to_value(&participants)?;
        let now = to_value(&Utc::now())?;
        let [low, high] = participants.members();

        let outcome = retry_transient(&self.retry, || async {
            let merge = Merge::new()
                .set_if_absent("id", chat_key.clone())
                .set_if_absent("participants", participants_value.clone())
                .set_if_absent("matchId", match_id.to_string())
                .set_if_absent("createdAt", now.clone())
                .set_if_absent(unread_path(low), 0)
                .set_if_absent(unread_path(high), 0);
            self.store
                .merge(collections::CHATS, &chat_key, merge)
                .await?
                .ok_or_else(|| AppError::Internal(format!("chat upsert for {chat_key} returned nothing")))
        })
        .await?;

        let match_key = match_id.to_string();
        retry_transient(&self.retry, || async {
            self.store
                .merge(
                    collections::MATCHES,
                    &match_key,
                    Merge::new()
                        .set_if_absent("chatId", chat_key.clone())
                        .require_existing(),
                )
                .await?;
            Ok(())
        })
        .await?;

        if outcome.created {
            info!(chat_id = %chat_id, match_id = %match_id, "chat thread created");
        }
        Ok(chat_id)
    }

    /// Open (or find) the thread for an existing match.
    pub async fn open_chat_for_match(&self, requester: Uuid, match_id: Uuid) -> AppResult<Uuid> {
        let record = self.load_match(match_id).await?;
        if !record.is_participant(requester) {
            return Err(AppError::NotAuthorized);
        }
        self.create_or_get_chat(requester, record.participants, match_id)
            .await
    }

    async fn load_match(&self, match_id: Uuid) -> AppResult<MatchRecord> {
        let doc = self
            .store
            .get(collections::MATCHES, &match_id.to_string())
            .await?
            .ok_or_else(|| AppError::RecordNotFound(format!("match {match_id}")))?;
        Ok(decode(doc)?)
    }

    async fn load_thread(&self, chat_id: Uuid) -> AppResult<ChatThread> {
        let doc = self
            .store
            .get(collections::CHATS, &chat_id.to_string())
            .await?
            .ok_or_else(|| AppError::RecordNotFound(format!("chat {chat_id}")))?;
        Ok(decode(doc)?)
    }

    async fn authorize(&self, chat_id: Uuid, user_id: Uuid) -> AppResult<ChatThread> {
        let thread = self.load_thread(chat_id).await?;
        if !thread.is_participant(user_id) {
            return Err(AppError::NotAuthorized);
        }
        Ok(thread)
    }

    pub async fn get_chat(&self, chat_id: Uuid, requester: Uuid) -> AppResult<ChatThread> {
        self.authorize(chat_id, requester).await
    }

    /// Ordered snapshot of the thread.
    pub async fn list_messages(&self, chat_id: Uuid, requester: Uuid) -> AppResult<Vec<Message>> {
        self.authorize(chat_id, requester).await?;
        load_messages(self.store.as_ref(), chat_id).await
    }

    pub async fn unread_count(&self, chat_id: Uuid, user_id: Uuid) -> AppResult<i64> {
        Ok(self.authorize(chat_id, user_id).await?.unread_for(user_id))
    }

    pub async fn send_message(&self, chat_id: Uuid, sender_id: Uuid, text: &str) -> AppResult<Message> {
        if text.trim().is_empty() {
            return Err(AppError::InvalidInput("message text is empty".into()));
        }
        let length = text.chars().count();
        if length > self.max_message_length {
            return Err(AppError::InvalidInput(format!(
                "message is {length} characters, limit is {}",
                self.max_message_length
            )));
        }

        let thread = self.authorize(chat_id, sender_id).await?;
        let recipients: Vec<Uuid> = thread
            .participants
            .members()
            .into_iter()
            .filter(|p| *p != sender_id)
            .collect();
        let chat_key = chat_id.to_string();

        let outcome = retry_transient(&self.retry, || async {
            let merge = recipients.iter().fold(
                Merge::new().server_timestamp("lastMessageTime").require_existing(),
                |merge, recipient| merge.increment(unread_path(*recipient), 1),
            );
            self.store
                .merge(collections::CHATS, &chat_key, merge)
                .await?
                .ok_or_else(|| AppError::RecordNotFound(format!("chat {chat_id}")))
        })
        .await?;

        let timestamp = lookup(&outcome.document, "lastMessageTime")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| AppError::Internal(format!("chat {chat_id} has no lastMessageTime")))?;

        let message = Message {
            id: Uuid::new_v4(),
            chat_id,
            sender_id,
            text: text.to_string(),
            timestamp,
            read: false,
        };
        let message_key = message.id.to_string();
        let message_doc = encode(&message)?;

        let written = retry_transient(&self.retry, || async {
            self.store
                .merge(
                    collections::MESSAGES,
                    &message_key,
                    Merge::new().set_document(message_doc.clone()),
                )
                .await?;
            Ok(())
        })
        .await;

        if let Err(e) = written {
            self.compensate_unread(chat_id, &recipients).await;
            return Err(e);
        }

        let bump = Merge::new()
            .set("lastActivity", to_value(&Utc::now())?)
            .require_existing();
        if let Err(e) = self
            .store
            .merge(collections::MATCHES, &thread.match_id.to_string(), bump)
            .await
        {
            warn!(match_id = %thread.match_id, error = %e, "match activity update failed");
        }

        MESSAGES_SENT_TOTAL.inc();
        debug!(chat_id = %chat_id, message_id = %message.id, timestamp, "message sent");

        for recipient in &recipients {
            fire_and_forget(
                self.notifier.clone(),
                NotificationEvent::message_received(
                    *recipient,
                    sender_id,
                    chat_id,
                    message.id,
                    &message.text,
                ),
            );
        }

        Ok(message)
    }

    async fn compensate_unread(&self, chat_id: Uuid, recipients: &[Uuid]) {
        let merge = recipients
            .iter()
            .fold(Merge::new().require_existing(), |merge, recipient| {
                merge.increment(unread_path(*recipient), -1)
            });
        let result = retry_transient(&self.retry, || async {
            Ok(self
                .store
                .merge(collections::CHATS, &chat_id.to_string(), merge.clone())
                .await?)
        })
        .await;

        if let Err(e) = result {
            error!(chat_id = %chat_id, error = %e, "unread counter compensation failed");
        }
    }

    /// Reset `user_id`'s unread counter; message read flags are best-effort.
    pub async fn mark_read(&self, chat_id: Uuid, user_id: Uuid) -> AppResult<()> {
        self.authorize(chat_id, user_id).await?;

        match load_messages(self.store.as_ref(), chat_id).await {
            Ok(messages) => {
                for message in messages
                    .into_iter()
                    .filter(|m| m.sender_id != user_id && !m.read)
                {
                    let merge = Merge::new().set("read", true).require_existing();
                    if let Err(e) = self
                        .store
                        .merge(collections::MESSAGES, &message.id.to_string(), merge)
                        .await
                    {
                        warn!(message_id = %message.id, error = %e, "read flag update failed");
                    }
                }
            }
            Err(e) => warn!(chat_id = %chat_id, error = %e, "could not load messages to flag as read"),
        }

        let chat_key = chat_id.to_string();
        retry_transient(&self.retry, || async {
            self.store
                .merge(
                    collections::CHATS,
                    &chat_key,
                    Merge::new().set(unread_path(user_id), 0).require_existing(),
                )
                .await?
                .ok_or_else(|| AppError::RecordNotFound(format!("chat {chat_id}")))?;
            Ok(())
        })
        .await
    }

    pub async fn subscribe_to_messages(
        &self,
        chat_id: Uuid,
        requester: Uuid,
    ) -> AppResult<MessageSubscription> {
        self.authorize(chat_id, requester).await?;
        MessageSubscription::open(self.store.clone(), chat_id).await
    }

    /// Presence failures are swallowed; only authorization errors surface.
    pub async fn set_typing(&self, chat_id: Uuid, user_id: Uuid, is_typing: bool) -> AppResult<()> {
        self.authorize(chat_id, user_id).await?;
        self.presence.set_typing(chat_id, user_id, is_typing).await;
        Ok(())
    }

    pub async fn typing_users(&self, chat_id: Uuid, requester: Uuid) -> AppResult<Vec<TypingState>> {
        self.authorize(chat_id, requester).await?;
        self.presence.typing_users(chat_id).await
    }

    pub async fn subscribe_typing(
        &self,
        chat_id: Uuid,
        requester: Uuid,
    ) -> AppResult<PresenceSubscription> {
        self.authorize(chat_id, requester).await?;
        self.presence.subscribe(chat_id).await
    }

    /// Delete the thread, then cascade to its messages, presence and match.
    ///
    /// The cascade is not atomic with the thread deletion. Cascade failures
    /// are logged and counted in the report instead of failing the call.
    pub async fn delete_chat(&self, chat_id: Uuid, requester: Uuid) -> AppResult<DeleteChatReport> {
        let thread = self.authorize(chat_id, requester).await?;
        let chat_key = chat_id.to_string();

        retry_transient(&self.retry, || async {
            Ok(self.store.delete(collections::CHATS, &chat_key).await?)
        })
        .await?;

        let mut report = DeleteChatReport {
            chat_id,
            messages_deleted: 0,
            messages_failed: 0,
            presence_cleared: 0,
            match_expired: false,
        };

        match load_messages(self.store.as_ref(), chat_id).await {
            Ok(messages) => {
                for message in messages {
                    match self
                        .store
                        .delete(collections::MESSAGES, &message.id.to_string())
                        .await
                    {
                        Ok(_) => report.messages_deleted += 1,
                        Err(e) => {
                            warn!(message_id = %message.id, error = %e, "message delete failed");
                            report.messages_failed += 1;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(chat_id = %chat_id, error = %e, "could not list messages for cascade");
                report.messages_failed += 1;
            }
        }

        match self.presence.clear_chat(chat_id).await {
            Ok((cleared, _)) => report.presence_cleared = cleared,
            Err(e) => warn!(chat_id = %chat_id, error = %e, "presence cleanup failed"),
        }

        match expire_match_record(self.store.as_ref(), thread.match_id).await {
            Ok(expired) => report.match_expired = expired,
            Err(e) => warn!(match_id = %thread.match_id, error = %e, "match expiry after chat deletion failed"),
        }

        info!(
            chat_id = %chat_id,
            requester = %requester,
            messages_deleted = report.messages_deleted,
            messages_failed = report.messages_failed,
            "chat deleted"
        );
        Ok(report)
    }
}
