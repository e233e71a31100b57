use crate::models::canonical::ParticipantPair;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// One chat thread per participant pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatThread {
    pub id: Uuid,
    pub participants: ParticipantPair,
    /// Canonical match key of the same pair
    pub match_id: Uuid,
    #[serde(default)]
    pub unread_count: HashMap<Uuid, i64>,
    /// Timestamp of the newest message, microseconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_time: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl ChatThread {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.participants.contains(user_id)
    }

    pub fn unread_for(&self, user_id: Uuid) -> i64 {
        self.unread_count.get(&user_id).copied().unwrap_or(0)
    }
}
