//! Notification dispatch
//!
//! Match and message notifications are fire-and-forget: the engine hands the
//! event to a spawned task and never waits on delivery. Delivery mechanics
//! (push, email) belong to the downstream notification service.

use crate::error::AppError;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEventType {
    MatchCreated,
    MessageReceived,
}

impl std::fmt::Display for NotificationEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationEventType::MatchCreated => write!(f, "match_created"),
            NotificationEventType::MessageReceived => write!(f, "message_received"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_type: NotificationEventType,
    pub payload: serde_json::Value,
    pub timestamp: i64,
}

impl NotificationEvent {
    pub fn new(user_id: Uuid, event_type: NotificationEventType, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            event_type,
            payload,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn match_created(user_id: Uuid, match_id: Uuid, other_user: Uuid, strength: u8) -> Self {
        Self::new(
            user_id,
            NotificationEventType::MatchCreated,
            serde_json::json!({
                "match_id": match_id.to_string(),
                "other_user_id": other_user.to_string(),
                "strength": strength,
            }),
        )
    }

    pub fn message_received(
        recipient_id: Uuid,
        sender_id: Uuid,
        chat_id: Uuid,
        message_id: Uuid,
        text: &str,
    ) -> Self {
        Self::new(
            recipient_id,
            NotificationEventType::MessageReceived,
            serde_json::json!({
                "sender_id": sender_id.to_string(),
                "chat_id": chat_id.to_string(),
                "message_id": message_id.to_string(),
                "preview": truncate_message_preview(text, 100),
            }),
        )
    }
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, event: NotificationEvent) -> Result<(), AppError>;
}

/// Writes notifications to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationDispatcher;

#[async_trait]
impl NotificationDispatcher for LogNotificationDispatcher {
    async fn dispatch(&self, event: NotificationEvent) -> Result<(), AppError> {
        tracing::info!(
            user_id = %event.user_id,
            event_type = %event.event_type,
            notification_id = %event.id,
            "notification dispatched"
        );
        Ok(())
    }
}

/// Dispatch on a background task; failures are logged and dropped.
pub fn fire_and_forget(dispatcher: Arc<dyn NotificationDispatcher>, event: NotificationEvent) {
    tokio::spawn(async move {
        let user_id = event.user_id;
        let event_type = event.event_type;
        if let Err(e) = dispatcher.dispatch(event).await {
            tracing::warn!(
                error = %e,
                user_id = %user_id,
                event_type = %event_type,
                "notification dispatch failed"
            );
        }
    });
}

/// Truncate a message preview to `max_len` characters, adding an ellipsis if needed
pub fn truncate_message_preview(message: &str, max_len: usize) -> String {
    if message.chars().count() <= max_len {
        message.to_string()
    } else {
        let truncated: String = message.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

#[cfg(feature = "kafka")]
pub use kafka::KafkaNotificationProducer;

#[cfg(feature = "kafka")]
mod kafka {
    use super::{NotificationDispatcher, NotificationEvent};
    use crate::error::AppError;
    use async_trait::async_trait;
    use rdkafka::config::ClientConfig;
    use rdkafka::producer::{FutureProducer, FutureRecord};
    use std::time::Duration;

    /// Publishes notification events as JSON, keyed by recipient.
    #[derive(Clone)]
    pub struct KafkaNotificationProducer {
        producer: FutureProducer,
        topic: String,
    }

    impl KafkaNotificationProducer {
        pub fn new(brokers: &str, topic: &str) -> Result<Self, AppError> {
            let producer: FutureProducer = ClientConfig::new()
                .set("bootstrap.servers", brokers)
                .set("message.timeout.ms", "5000")
                .set("acks", "all")
                .set("retries", "3")
                .set("retry.backoff.ms", "100")
                .create()
                .map_err(|e| AppError::Config(format!("kafka producer: {e}")))?;

            tracing::info!(brokers = %brokers, topic = %topic, "KafkaNotificationProducer initialized");

            Ok(Self {
                producer,
                topic: topic.to_string(),
            })
        }
    }

    #[async_trait]
    impl NotificationDispatcher for KafkaNotificationProducer {
        async fn dispatch(&self, event: NotificationEvent) -> Result<(), AppError> {
            let payload = serde_json::to_string(&event)?;
            let key = event.user_id.to_string();
            let record = FutureRecord::to(&self.topic).key(&key).payload(&payload);

            match self.producer.send(record, Duration::from_secs(5)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        user_id = %event.user_id,
                        event_type = %event.event_type,
                        partition,
                        offset,
                        "notification published to Kafka"
                    );
                    Ok(())
                }
                Err((e, _)) => Err(AppError::NetworkError(format!("kafka publish: {e}"))),
            }
        }
    }
}
