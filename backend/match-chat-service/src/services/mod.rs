pub mod chat_coordinator;
pub mod discovery;
pub mod match_discovery;
pub mod message_view;
pub mod notification;
pub mod presence_tracker;
pub mod quota;
pub mod typing_debouncer;

pub use chat_coordinator::{ChatCoordinator, DeleteChatReport};
pub use match_discovery::{DiscoveryReport, MatchDiscoveryEngine, MatchUpsert};
pub use message_view::{MessageSubscription, MessageView};
pub use notification::{LogNotificationDispatcher, NotificationDispatcher, NotificationEvent};
pub use presence_tracker::{PresenceSubscription, PresenceTracker};
pub use quota::{FixedWindowQuota, QuotaChecker, UnlimitedQuota};
pub use typing_debouncer::TypingDebouncer;

use crate::error::{AppError, AppResult};
use resilience::{RetryConfig, RetryError};
use std::future::Future;

/// Retry `WriteConflict` and `NetworkError` with backoff; everything else fails at once.
pub(crate) async fn retry_transient<F, Fut, T>(config: &RetryConfig, f: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    resilience::with_retry_if(config.clone(), AppError::is_retryable, f)
        .await
        .map_err(RetryError::into_inner)
}
