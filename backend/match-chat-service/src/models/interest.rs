use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user's declared intent to attend an event. Immutable once written,
/// apart from the `indexed` flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interest {
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub declared_at: DateTime<Utc>,
    /// Set once the user is in the event's index; records predating the flag count as indexed
    #[serde(default = "already_indexed")]
    pub indexed: bool,
}

fn already_indexed() -> bool {
    true
}

/// Per-event secondary index: every user that declared interest in the event.
///
/// Maintained by set-union after the interest record itself is written, so it
/// may lag behind `interests`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInterestIndex {
    pub event_id: Uuid,
    #[serde(default)]
    pub users: Vec<Uuid>,
}

impl EventInterestIndex {
    pub fn contains(&self, user_id: Uuid) -> bool {
        self.users.contains(&user_id)
    }
}
