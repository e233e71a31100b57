mod indexed;
mod scan;

use crate::error::{AppError, AppResult};
use crate::models::{Interest, MatchCandidate, ParticipantPair};
use crate::models::canonical::interest_id;
use crate::store::{collections, decode, DocumentStore, Filter, Merge};
use serde_json::Value;
use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

pub use indexed::IndexedStrategy;
pub use scan::ScanStrategy;

/// One way of finding reciprocal-interest pairs for a user.
///
/// Every strategy keys its candidates by the canonical match id, so results
/// from different strategies can be merged without ever disagreeing on
/// identity.
#[async_trait]
pub trait DiscoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Candidates across every event `user_id` is interested in.
    async fn discover(&self, user_id: Uuid) -> AppResult<StrategyOutcome>;

    /// Candidates sharing `event_id` with `user_id` only.
    async fn discover_event(&self, user_id: Uuid, event_id: Uuid) -> AppResult<StrategyOutcome>;
}

/// Candidates keyed by match id plus the number of skipped lookups.
#[derive(Debug, Default, Clone)]
pub struct StrategyOutcome {
    pub candidates: HashMap<Uuid, MatchCandidate>,
    pub failures: usize,
}

impl StrategyOutcome {
    pub fn add(&mut self, user_id: Uuid, peer_id: Uuid, event_id: Uuid) -> AppResult<()> {
        let pair = ParticipantPair::new(user_id, peer_id)?;
        self.candidates
            .entry(pair.match_id())
            .or_insert_with(|| MatchCandidate::new(pair))
            .add_event(event_id);
        Ok(())
    }

    /// Union another outcome into this one by canonical id.
    pub fn merge(&mut self, other: StrategyOutcome) {
        for (id, candidate) in other.candidates {
            match self.candidates.get_mut(&id) {
                Some(existing) => existing.absorb(candidate),
                None => {
                    self.candidates.insert(id, candidate);
                }
            }
        }
        self.failures += other.failures;
    }

    pub fn into_candidates(self) -> Vec<MatchCandidate> {
        let mut candidates: Vec<_> = self.candidates.into_values().collect();
        candidates.sort_by_key(|c| c.match_id);
        candidates
    }
}

/// Events `user_id` has declared interest in, from the flat interest records.
pub(crate) async fn user_events(
    store: &dyn DocumentStore,
    user_id: Uuid,
) -> AppResult<Vec<Uuid>> {
    let rows = store
        .query(
            collections::INTERESTS,
            &[Filter::eq("userId", user_id.to_string())],
        )
        .await?;

    let mut events = Vec::with_capacity(rows.len());
    for (id, doc) in rows {
        match decode::<Interest>(doc) {
            Ok(interest) => events.push(interest.event_id),
            Err(e) => {
                tracing::warn!(interest_id = %id, error = %e, "skipping malformed interest record");
            }
        }
    }
    events.sort();
    events.dedup();
    Ok(events)
}

/// Union `users` into the index of `event_id`, then flag their interest
/// records as indexed.
///
/// The flag is only written after the union succeeded, so an unflagged record
/// always marks a user the index may be missing.
pub(crate) async fn index_users(
    store: &dyn DocumentStore,
    event_id: Uuid,
    users: &[Uuid],
) -> AppResult<()> {
    if users.is_empty() {
        return Ok(());
    }

    let members = users.iter().map(|u| Value::from(u.to_string())).collect();
    let merge = Merge::new()
        .set_if_absent("eventId", event_id.to_string())
        .array_union("users", members);
    store
        .merge(collections::EVENT_INTERESTS, &event_id.to_string(), merge)
        .await?;

    for user_id in users {
        store
            .merge(
                collections::INTERESTS,
                &interest_id(*user_id, event_id).to_string(),
                Merge::new().set("indexed", true).require_existing(),
            )
            .await?;
    }
    Ok(())
}

/// Users interested in `event_id` whose records are not yet in its index.
pub(crate) async fn unindexed_users(
    store: &dyn DocumentStore,
    event_id: Uuid,
) -> AppResult<Vec<Uuid>> {
    let rows = store
        .query(
            collections::INTERESTS,
            &[
                Filter::eq("eventId", event_id.to_string()),
                Filter::eq("indexed", false),
            ],
        )
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(_, doc)| decode::<Interest>(doc).ok())
        .map(|interest| interest.user_id)
        .collect())
}

pub(crate) fn is_index_unavailable(e: &AppError) -> bool {
    matches!(e, AppError::IndexUnavailable(_))
}
