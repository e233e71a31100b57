use crate::{
    config::Config,
    services::{
        ChatCoordinator, FixedWindowQuota, MatchDiscoveryEngine, NotificationDispatcher,
        PresenceTracker, QuotaChecker, UnlimitedQuota,
    },
    store::DocumentStore,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn DocumentStore>,
    pub discovery: Arc<MatchDiscoveryEngine>,
    pub chats: Arc<ChatCoordinator>,
}

impl AppState {
    /// Wire the engines over `store` using the settings in `config`.
    pub fn build(
        config: Arc<Config>,
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let quota = quota_from_config(&config);
        Self::with_quota(config, store, notifier, quota)
    }

    pub fn with_quota(
        config: Arc<Config>,
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn NotificationDispatcher>,
        quota: Arc<dyn QuotaChecker>,
    ) -> Self {
        let retry = config.retry_config();

        let discovery = MatchDiscoveryEngine::new(store.clone(), quota, notifier.clone())
            .with_always_scan(config.discovery.always_scan)
            .with_retry(retry.clone());

        let presence = PresenceTracker::new(store.clone(), config.typing_ttl);
        let chats = ChatCoordinator::new(store.clone(), presence, notifier)
            .with_retry(retry)
            .with_max_message_length(config.max_message_length);

        Self {
            config,
            store,
            discovery: Arc::new(discovery),
            chats: Arc::new(chats),
        }
    }
}

/// Fixed-window quota when `DISCOVERY_SCANS_PER_WINDOW` is set, unlimited otherwise.
pub fn quota_from_config(config: &Config) -> Arc<dyn QuotaChecker> {
    match config.discovery.scans_per_window {
        Some(limit) => Arc::new(FixedWindowQuota::new(
            limit,
            config.discovery.window,
            config.discovery.premium_user_ids.iter().copied(),
        )),
        None => Arc::new(UnlimitedQuota),
    }
}
