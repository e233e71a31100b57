use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chat message. Append-only; only `read` ever changes after insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub text: String,
    /// Server-assigned microseconds since the Unix epoch, strictly increasing per thread
    pub timestamp: i64,
    #[serde(default)]
    pub read: bool,
}

impl Message {
    /// Sort key used by every ordered view: timestamp first, id as tiebreak.
    pub fn order_key(&self) -> (i64, Uuid) {
        (self.timestamp, self.id)
    }
}
