use super::{unindexed_users, user_events, DiscoveryStrategy, StrategyOutcome};
use crate::error::{AppError, AppResult};
use crate::models::canonical::interest_id;
use crate::models::EventInterestIndex;
use crate::store::{collections, decode, DocumentStore, StoreError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lists peers from the per-event secondary index, then confirms each one
/// with a point lookup on its interest record.
///
/// The index is maintained after the interest record is written, so it can
/// lag. A missing index document, one that does not list the user themself,
/// or an event with interest records not yet flagged as indexed is reported
/// as [`AppError::IndexUnavailable`] so the caller can fall back to a scan.
pub struct IndexedStrategy {
    store: Arc<dyn DocumentStore>,
}

impl IndexedStrategy {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    async fn load_index(&self, event_id: Uuid) -> AppResult<EventInterestIndex> {
        let key = event_id.to_string();
        let doc = self
            .store
            .get(collections::EVENT_INTERESTS, &key)
            .await?
            .ok_or_else(|| {
                AppError::IndexUnavailable(format!("{}/{key} missing", collections::EVENT_INTERESTS))
            })?;
        Ok(decode(doc)?)
    }

    async fn collect_event(
        &self,
        user_id: Uuid,
        event_id: Uuid,
        outcome: &mut StrategyOutcome,
    ) -> AppResult<()> {
        let index = match self.load_index(event_id).await {
            Ok(index) => index,
            Err(e @ AppError::IndexUnavailable(_)) => return Err(e),
            Err(e) => {
                warn!(event_id = %event_id, error = %e, "event index read failed");
                outcome.failures += 1;
                return Ok(());
            }
        };

        if !index.contains(user_id) {
            return Err(AppError::IndexUnavailable(format!(
                "{}/{event_id} does not list {user_id}",
                collections::EVENT_INTERESTS
            )));
        }

        match unindexed_users(self.store.as_ref(), event_id).await {
            Ok(pending) if !pending.is_empty() => {
                return Err(AppError::IndexUnavailable(format!(
                    "{}/{event_id} is missing {} user(s)",
                    collections::EVENT_INTERESTS,
                    pending.len()
                )));
            }
            Ok(_) => {}
            Err(e @ AppError::IndexUnavailable(_)) => return Err(e),
            Err(e) => {
                warn!(event_id = %event_id, error = %e, "pending index check failed");
                outcome.failures += 1;
                return Ok(());
            }
        }

        for peer_id in index.users.iter().copied().filter(|p| *p != user_id) {
            let lookup = self
                .store
                .get(collections::INTERESTS, &interest_id(peer_id, event_id).to_string())
                .await;

            match lookup {
                Ok(Some(_)) => outcome.add(user_id, peer_id, event_id)?,
                Ok(None) => {
                    debug!(peer_id = %peer_id, event_id = %event_id, "indexed peer has no interest record");
                }
                Err(StoreError::IndexUnavailable(collection)) => {
                    return Err(AppError::IndexUnavailable(collection));
                }
                Err(e) => {
                    warn!(peer_id = %peer_id, event_id = %event_id, error = %e, "reciprocity lookup failed");
                    outcome.failures += 1;
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl DiscoveryStrategy for IndexedStrategy {
    fn name(&self) -> &'static str {
        "indexed"
    }

    async fn discover(&self, user_id: Uuid) -> AppResult<StrategyOutcome> {
        let mut outcome = StrategyOutcome::default();
        for event_id in user_events(self.store.as_ref(), user_id).await? {
            self.collect_event(user_id, event_id, &mut outcome).await?;
        }
        Ok(outcome)
    }

    async fn discover_event(&self, user_id: Uuid, event_id: Uuid) -> AppResult<StrategyOutcome> {
        let mut outcome = StrategyOutcome::default();
        self.collect_event(user_id, event_id, &mut outcome).await?;
        Ok(outcome)
    }
}
