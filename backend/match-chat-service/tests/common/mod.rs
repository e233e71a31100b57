#![allow(dead_code)]

use async_trait::async_trait;
use match_chat_service::error::AppError;
use match_chat_service::services::notification::NotificationEventType;
use match_chat_service::services::{
    ChatCoordinator, MatchDiscoveryEngine, NotificationDispatcher, NotificationEvent,
    PresenceTracker, UnlimitedQuota,
};
use match_chat_service::store::MemoryStore;
use resilience::RetryConfig;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Captures every dispatched notification for later assertions.
#[derive(Default)]
pub struct RecordingDispatcher {
    events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingDispatcher {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event_type: NotificationEventType) -> usize {
        self.events()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn dispatch(&self, event: NotificationEvent) -> Result<(), AppError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Short backoff so injected transient faults resolve quickly.
pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingDispatcher>,
    pub discovery: MatchDiscoveryEngine,
    pub chats: ChatCoordinator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_typing_ttl(Duration::from_secs(5))
    }

    pub fn with_typing_ttl(ttl: Duration) -> Self {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingDispatcher::default());
        let discovery = MatchDiscoveryEngine::new(
            store.clone(),
            Arc::new(UnlimitedQuota),
            notifier.clone(),
        )
        .with_retry(fast_retry(0));
        let chats = ChatCoordinator::new(
            store.clone(),
            PresenceTracker::new(store.clone(), ttl),
            notifier.clone(),
        )
        .with_retry(fast_retry(0));

        Self {
            store,
            notifier,
            discovery,
            chats,
        }
    }

    /// A pending match between two fresh users and its open chat thread.
    pub async fn matched_chat(&self) -> (Uuid, Uuid, Uuid, Uuid) {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let upsert = self
            .discovery
            .create_match_if_absent(a, b, &BTreeSet::from([Uuid::new_v4()]))
            .await
            .unwrap();
        let chat_id = self
            .chats
            .open_chat_for_match(a, upsert.record.id)
            .await
            .unwrap();
        (a, b, upsert.record.id, chat_id)
    }
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
