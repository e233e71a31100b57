use super::{index_users, user_events, DiscoveryStrategy, StrategyOutcome};
use crate::error::AppResult;
use crate::models::{Interest, MatchCandidate, MatchRecord};
use crate::store::{collections, decode, DocumentStore, Filter};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Field-filtered scan over the flat interest and match records.
///
/// Slower than the index but never depends on it. Interest records it finds
/// that the index is missing are unioned back into the index.
pub struct ScanStrategy {
    store: Arc<dyn DocumentStore>,
}

impl ScanStrategy {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    async fn collect_event(&self, user_id: Uuid, event_id: Uuid, outcome: &mut StrategyOutcome) {
        let rows = match self
            .store
            .query(
                collections::INTERESTS,
                &[Filter::eq("eventId", event_id.to_string())],
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(event_id = %event_id, error = %e, "interest scan failed");
                outcome.failures += 1;
                return;
            }
        };

        let mut unindexed = Vec::new();
        for (id, doc) in rows {
            let interest: Interest = match decode(doc) {
                Ok(interest) => interest,
                Err(e) => {
                    warn!(interest_id = %id, error = %e, "skipping malformed interest record");
                    outcome.failures += 1;
                    continue;
                }
            };
            if !interest.indexed {
                unindexed.push(interest.user_id);
            }
            if interest.user_id == user_id {
                continue;
            }
            if let Err(e) = outcome.add(user_id, interest.user_id, event_id) {
                warn!(interest_id = %id, error = %e, "skipping candidate");
                outcome.failures += 1;
            }
        }

        match index_users(self.store.as_ref(), event_id, &unindexed).await {
            Ok(()) if !unindexed.is_empty() => {
                info!(event_id = %event_id, repaired = unindexed.len(), "event index repaired from scan");
            }
            Ok(()) => {}
            Err(e) => warn!(event_id = %event_id, error = %e, "event index repair failed"),
        }
    }

    /// Existing matches for the user, so their shared events are carried forward.
    async fn collect_matches(&self, user_id: Uuid, outcome: &mut StrategyOutcome) {
        let rows = match self
            .store
            .query(
                collections::MATCHES,
                &[Filter::array_contains("participants", user_id.to_string())],
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "match scan failed");
                outcome.failures += 1;
                return;
            }
        };

        let mut existing = StrategyOutcome::default();
        for (id, doc) in rows {
            match decode::<MatchRecord>(doc) {
                Ok(record) if !record.shared_events.is_empty() => {
                    existing
                        .candidates
                        .insert(record.id, MatchCandidate::from(&record));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(match_id = %id, error = %e, "skipping malformed match record");
                    outcome.failures += 1;
                }
            }
        }
        outcome.merge(existing);
    }
}

#[async_trait]
impl DiscoveryStrategy for ScanStrategy {
    fn name(&self) -> &'static str {
        "scan"
    }

    async fn discover(&self, user_id: Uuid) -> AppResult<StrategyOutcome> {
        let mut outcome = StrategyOutcome::default();
        for event_id in user_events(self.store.as_ref(), user_id).await? {
            self.collect_event(user_id, event_id, &mut outcome).await;
        }
        self.collect_matches(user_id, &mut outcome).await;
        Ok(outcome)
    }

    async fn discover_event(&self, user_id: Uuid, event_id: Uuid) -> AppResult<StrategyOutcome> {
        let mut outcome = StrategyOutcome::default();
        self.collect_event(user_id, event_id, &mut outcome).await;
        Ok(outcome)
    }
}
