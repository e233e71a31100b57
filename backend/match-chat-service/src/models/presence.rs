use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingState {
    pub chat_id: Uuid,
    pub user_id: Uuid,
    pub is_typing: bool,
    pub expires_at: DateTime<Utc>,
}

impl TypingState {
    /// Typing and not yet past its TTL.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.is_typing && self.expires_at > now
    }
}
