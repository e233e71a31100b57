use crate::models::canonical::ParticipantPair;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Pending => "pending",
            MatchStatus::Accepted => "accepted",
            MatchStatus::Declined => "declined",
            MatchStatus::Expired => "expired",
        }
    }

    /// pending -> accepted | declined, anything but expired -> expired.
    pub fn can_transition_to(&self, next: MatchStatus) -> bool {
        matches!(
            (self, next),
            (MatchStatus::Pending, MatchStatus::Accepted)
                | (MatchStatus::Pending, MatchStatus::Declined)
                | (MatchStatus::Pending, MatchStatus::Expired)
                | (MatchStatus::Accepted, MatchStatus::Expired)
                | (MatchStatus::Declined, MatchStatus::Expired)
        )
    }

    pub fn is_open(&self) -> bool {
        matches!(self, MatchStatus::Pending | MatchStatus::Accepted)
    }
}

/// Match strength from the number of shared events.
///
/// 0 -> 0, 1 -> 50, 2 -> 75, n > 2 -> min(100, 75 + (n - 2) * 10).
pub fn match_strength(shared_events: usize) -> u8 {
    match shared_events {
        0 => 0,
        1 => 50,
        2 => 75,
        n => 75usize.saturating_add((n - 2).saturating_mul(10)).min(100) as u8,
    }
}

/// Canonical match record, one per participant pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    pub id: Uuid,
    pub participant_a: Uuid,
    pub participant_b: Uuid,
    /// Both participants, for array-contains queries
    pub participants: ParticipantPair,
    #[serde(default)]
    pub shared_events: BTreeSet<Uuid>,
    #[serde(default)]
    pub strength: u8,
    pub status: MatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<Uuid>,
    pub matched_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl MatchRecord {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.participants.contains(user_id)
    }
}

/// A reciprocal pair found by discovery, before or after persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub match_id: Uuid,
    pub participants: ParticipantPair,
    pub shared_events: BTreeSet<Uuid>,
    pub strength: u8,
}

impl MatchCandidate {
    pub fn new(participants: ParticipantPair) -> Self {
        Self {
            match_id: participants.match_id(),
            participants,
            shared_events: BTreeSet::new(),
            strength: 0,
        }
    }

    pub fn add_event(&mut self, event_id: Uuid) {
        self.shared_events.insert(event_id);
        self.strength = match_strength(self.shared_events.len());
    }

    /// Union another candidate for the same pair into this one.
    pub fn absorb(&mut self, other: MatchCandidate) {
        debug_assert_eq!(self.match_id, other.match_id);
        self.shared_events.extend(other.shared_events);
        self.strength = match_strength(self.shared_events.len());
    }
}

impl From<&MatchRecord> for MatchCandidate {
    fn from(record: &MatchRecord) -> Self {
        Self {
            match_id: record.id,
            participants: record.participants,
            shared_events: record.shared_events.clone(),
            strength: record.strength,
        }
    }
}
