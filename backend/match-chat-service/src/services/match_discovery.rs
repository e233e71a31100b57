//! # Match discovery
//!
//! Detects reciprocal event interest and converges every writer onto one
//! canonical match record per participant pair.
//!
//! All match writes go through [`MatchDiscoveryEngine::create_match_if_absent`],
//! which only ever issues commutative field operations: creation fields are
//! set-if-absent, `sharedEvents` grows by set union and `strength` by max.
//! Concurrent discovery passes for the same pair therefore end in the same
//! record regardless of interleaving.

use crate::error::{AppError, AppResult};
use crate::metrics::{
    DISCOVERY_CANDIDATE_FAILURES_TOTAL, DISCOVERY_FALLBACKS_TOTAL, MATCHES_CREATED_TOTAL,
};
use crate::models::canonical::interest_id;
use crate::models::{match_strength, MatchCandidate, MatchRecord, MatchStatus, ParticipantPair};
use crate::services::discovery::{
    index_users, is_index_unavailable, DiscoveryStrategy, IndexedStrategy, ScanStrategy, StrategyOutcome,
};
use crate::services::notification::{fire_and_forget, NotificationDispatcher, NotificationEvent};
use crate::services::quota::QuotaChecker;
use crate::services::retry_transient;
use crate::store::{collections, decode, to_value, DocumentStore, Filter, Merge, StoreError};
use chrono::Utc;
use resilience::RetryConfig;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of a full discovery pass: persisted candidates plus skipped failures.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryReport {
    pub candidates: Vec<MatchCandidate>,
    pub failures: usize,
}

/// The record after an upsert, and whether the upsert created it.
#[derive(Debug, Clone)]
pub struct MatchUpsert {
    pub record: MatchRecord,
    pub created: bool,
}

#[derive(Debug, Clone, Copy)]
enum Scope {
    AllEvents,
    Event(Uuid),
}

async fn run_strategy(
    strategy: &dyn DiscoveryStrategy,
    user_id: Uuid,
    scope: Scope,
) -> AppResult<StrategyOutcome> {
    match scope {
        Scope::AllEvents => strategy.discover(user_id).await,
        Scope::Event(event_id) => strategy.discover_event(user_id, event_id).await,
    }
}

pub struct MatchDiscoveryEngine {
    store: Arc<dyn DocumentStore>,
    primary: Arc<dyn DiscoveryStrategy>,
    fallback: Arc<dyn DiscoveryStrategy>,
    quota: Arc<dyn QuotaChecker>,
    notifier: Arc<dyn NotificationDispatcher>,
    always_scan: bool,
    retry: RetryConfig,
}

impl MatchDiscoveryEngine {
    /// Indexed primary with scan fallback.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        quota: Arc<dyn QuotaChecker>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            primary: Arc::new(IndexedStrategy::new(store.clone())),
            fallback: Arc::new(ScanStrategy::new(store.clone())),
            store,
            quota,
            notifier,
            always_scan: false,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_strategies(
        mut self,
        primary: Arc<dyn DiscoveryStrategy>,
        fallback: Arc<dyn DiscoveryStrategy>,
    ) -> Self {
        self.primary = primary;
        self.fallback = fallback;
        self
    }

    /// Run the fallback alongside the primary on every pass and merge the results.
    pub fn with_always_scan(mut self, always_scan: bool) -> Self {
        self.always_scan = always_scan;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Record interest in `event_id` and check that event for reciprocity.
    ///
    /// Re-declaring is a no-op on the interest record. Fails when the event
    /// index cannot be updated after retries; the interest stays recorded and
    /// other users' discovery still finds it through the scan fallback.
    /// Returns the matches created or grown by the check.
    pub async fn declare_interest(
        &self,
        user_id: Uuid,
        event_id: Uuid,
    ) -> AppResult<Vec<MatchCandidate>> {
        let interest_key = interest_id(user_id, event_id).to_string();
        let now = to_value(&Utc::now())?;

        let created = retry_transient(&self.retry, || async {
            let merge = Merge::new()
                .set_if_absent("userId", user_id.to_string())
                .set_if_absent("eventId", event_id.to_string())
                .set_if_absent("declaredAt", now.clone())
                .set_if_absent("indexed", false);
            Ok(self
                .store
                .merge(collections::INTERESTS, &interest_key, merge)
                .await?
                .map(|outcome| outcome.created)
                .unwrap_or(false))
        })
        .await?;

        if created {
            info!(user_id = %user_id, event_id = %event_id, "interest declared");
        } else {
            debug!(user_id = %user_id, event_id = %event_id, "interest already declared");
        }

        // An unflagged interest record makes other users' passes fall back to a
        // scan, so a failure here delays nothing; re-declaring repairs it
        retry_transient(&self.retry, || {
            index_users(self.store.as_ref(), event_id, std::slice::from_ref(&user_id))
        })
        .await
        .map_err(|e| {
            warn!(user_id = %user_id, event_id = %event_id, error = %e, "event interest index update failed");
            e
        })?;

        let outcome = self.run(user_id, Scope::Event(event_id)).await?;
        let (matches, failures) = self.persist(outcome).await;
        if failures > 0 {
            warn!(user_id = %user_id, event_id = %event_id, failures, "mutual check skipped candidates");
        }
        Ok(matches)
    }

    /// Full discovery pass for `user_id` across every declared event.
    pub async fn find_mutual_matches(&self, user_id: Uuid) -> AppResult<DiscoveryReport> {
        if !self.quota.check_quota(user_id).await {
            info!(user_id = %user_id, "discovery denied by quota");
            return Err(AppError::QuotaExceeded);
        }

        let outcome = self.run(user_id, Scope::AllEvents).await?;
        let (candidates, failures) = self.persist(outcome).await;

        info!(
            user_id = %user_id,
            candidates = candidates.len(),
            failures,
            "discovery pass completed"
        );

        Ok(DiscoveryReport {
            candidates,
            failures,
        })
    }

    async fn run(&self, user_id: Uuid, scope: Scope) -> AppResult<StrategyOutcome> {
        let mut outcome = match run_strategy(self.primary.as_ref(), user_id, scope).await {
            Ok(outcome) => outcome,
            Err(e) if is_index_unavailable(&e) => {
                DISCOVERY_FALLBACKS_TOTAL
                    .with_label_values(&[self.primary.name()])
                    .inc();
                info!(
                    user_id = %user_id,
                    strategy = self.primary.name(),
                    fallback = self.fallback.name(),
                    reason = %e,
                    "primary discovery strategy unavailable, falling back"
                );
                return run_strategy(self.fallback.as_ref(), user_id, scope).await;
            }
            Err(e) => return Err(e),
        };

        if self.always_scan {
            outcome.merge(run_strategy(self.fallback.as_ref(), user_id, scope).await?);
        }
        Ok(outcome)
    }

    /// Upsert every candidate; failures are counted and skipped.
    async fn persist(&self, outcome: StrategyOutcome) -> (Vec<MatchCandidate>, usize) {
        let mut failures = outcome.failures;
        let mut persisted = Vec::new();

        for candidate in outcome.into_candidates() {
            let [a, b] = candidate.participants.members();
            match self
                .create_match_if_absent(a, b, &candidate.shared_events)
                .await
            {
                Ok(upsert) => persisted.push(MatchCandidate::from(&upsert.record)),
                Err(e) => {
                    warn!(match_id = %candidate.match_id, error = %e, "match upsert failed");
                    failures += 1;
                }
            }
        }

        DISCOVERY_CANDIDATE_FAILURES_TOTAL.inc_by(failures as u64);
        (persisted, failures)
    }

    /// Merge-upsert the canonical match for `(user_a, user_b)`.
    ///
    /// `shared_events` is unioned into the stored set, never replacing it.
    pub async fn create_match_if_absent(
        &self,
        user_a: Uuid,
        user_b: Uuid,
        shared_events: &BTreeSet<Uuid>,
    ) -> AppResult<MatchUpsert> {
        if shared_events.is_empty() {
            return Err(AppError::InvalidInput(
                "a match needs at least one shared event".into(),
            ));
        }

        let pair = ParticipantPair::new(user_a, user_b)?;
        let match_id = pair.match_id();
        let key = match_id.to_string();
        let events: Vec<Value> = shared_events
            .iter()
            .map(|e| Value::from(e.to_string()))
            .collect();
        let now = to_value(&Utc::now())?;
        let participants = to_value(&pair)?;
        let pending = to_value(&MatchStatus::Pending)?;

        let first = retry_transient(&self.retry, || async {
            let merge = Merge::new()
                .set_if_absent("id", key.clone())
                .set_if_absent("participantA", pair.low().to_string())
                .set_if_absent("participantB", pair.high().to_string())
                .set_if_absent("participants", participants.clone())
                .set_if_absent("status", pending.clone())
                .set_if_absent("matchedAt", now.clone())
                .set_if_absent("lastActivity", now.clone())
                .array_union("sharedEvents", events.clone());
            self.store
                .merge(collections::MATCHES, &key, merge)
                .await?
                .ok_or_else(|| AppError::Internal(format!("match upsert for {key} returned nothing")))
        })
        .await?;

        let mut record: MatchRecord = decode(first.document)?;
        let strength = match_strength(record.shared_events.len());

        // Max converges on the strength of the final union under concurrent upserts
        let second = retry_transient(&self.retry, || async {
            Ok(self
                .store
                .merge(
                    collections::MATCHES,
                    &key,
                    Merge::new()
                        .max("strength", i64::from(strength))
                        .require_existing(),
                )
                .await?)
        })
        .await?;

        match second {
            Some(outcome) => record = decode(outcome.document)?,
            None => record.strength = record.strength.max(strength),
        }

        if first.created {
            MATCHES_CREATED_TOTAL.inc();
            info!(
                match_id = %match_id,
                participant_a = %pair.low(),
                participant_b = %pair.high(),
                strength = record.strength,
                "match created"
            );
            for user in pair.members() {
                if let Some(other) = pair.other(user) {
                    fire_and_forget(
                        self.notifier.clone(),
                        NotificationEvent::match_created(user, match_id, other, record.strength),
                    );
                }
            }
        }

        Ok(MatchUpsert {
            record,
            created: first.created,
        })
    }

    pub async fn get_match(&self, match_id: Uuid, requester: Uuid) -> AppResult<MatchRecord> {
        let doc = self
            .store
            .get(collections::MATCHES, &match_id.to_string())
            .await?
            .ok_or_else(|| AppError::RecordNotFound(format!("match {match_id}")))?;
        let record: MatchRecord = decode(doc)?;
        if !record.is_participant(requester) {
            return Err(AppError::NotAuthorized);
        }
        Ok(record)
    }

    /// Matches `user_id` participates in, most recently active first.
    pub async fn list_matches(&self, user_id: Uuid) -> AppResult<Vec<MatchRecord>> {
        let rows = self
            .store
            .query(
                collections::MATCHES,
                &[Filter::array_contains("participants", user_id.to_string())],
            )
            .await?;

        let mut matches = Vec::with_capacity(rows.len());
        for (id, doc) in rows {
            match decode::<MatchRecord>(doc) {
                Ok(record) => matches.push(record),
                Err(e) => warn!(match_id = %id, error = %e, "skipping malformed match record"),
            }
        }
        matches.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(matches)
    }

    /// Move a match to `next`, guarded by a compare-and-set on its current status.
    pub async fn transition_match(
        &self,
        match_id: Uuid,
        actor: Uuid,
        next: MatchStatus,
    ) -> AppResult<MatchRecord> {
        let record = retry_transient(&self.retry, || self.try_transition(match_id, actor, next)).await?;
        info!(match_id = %match_id, actor = %actor, status = next.as_str(), "match transitioned");
        Ok(record)
    }

    async fn try_transition(
        &self,
        match_id: Uuid,
        actor: Uuid,
        next: MatchStatus,
    ) -> AppResult<MatchRecord> {
        let current = self.get_match(match_id, actor).await?;
        if !current.status.can_transition_to(next) {
            return Err(AppError::InvalidTransition {
                from: current.status,
                to: next,
            });
        }

        let merge = Merge::new()
            .set("status", next.as_str())
            .set("lastActivity", to_value(&Utc::now())?)
            .when("status", current.status.as_str());

        let outcome = self
            .store
            .merge(collections::MATCHES, &match_id.to_string(), merge)
            .await?
            .ok_or_else(|| AppError::RecordNotFound(format!("match {match_id}")))?;
        Ok(decode(outcome.document)?)
    }

    /// Expire pending matches idle for longer than `ttl`. Returns how many expired.
    pub async fn expire_stale_matches(&self, ttl: Duration) -> AppResult<usize> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AppError::InvalidInput(format!("match ttl out of range: {e}")))?;
        let cutoff = Utc::now() - ttl;

        let rows = self
            .store
            .query(
                collections::MATCHES,
                &[Filter::eq("status", MatchStatus::Pending.as_str())],
            )
            .await?;

        let mut expired = 0;
        for (id, doc) in rows {
            let record: MatchRecord = match decode(doc) {
                Ok(record) => record,
                Err(e) => {
                    warn!(match_id = %id, error = %e, "skipping malformed match record");
                    continue;
                }
            };
            if record.last_activity >= cutoff {
                continue;
            }

            let merge = Merge::new()
                .set("status", MatchStatus::Expired.as_str())
                .when("status", MatchStatus::Pending.as_str());
            match self.store.merge(collections::MATCHES, &id, merge).await {
                Ok(_) => expired += 1,
                Err(StoreError::PreconditionFailed { .. }) => {
                    debug!(match_id = %id, "match changed status before expiry");
                }
                Err(e) => warn!(match_id = %id, error = %e, "match expiry failed"),
            }
        }

        if expired > 0 {
            info!(expired, "expired stale matches");
        }
        Ok(expired)
    }
}

/// Mark a match expired unless it already is. Returns whether it changed.
pub(crate) async fn expire_match_record(
    store: &dyn DocumentStore,
    match_id: Uuid,
) -> AppResult<bool> {
    let key = match_id.to_string();
    let Some(doc) = store.get(collections::MATCHES, &key).await? else {
        return Ok(false);
    };
    let record: MatchRecord = decode(doc)?;
    if !record.status.can_transition_to(MatchStatus::Expired) {
        return Ok(false);
    }

    let merge = Merge::new()
        .set("status", MatchStatus::Expired.as_str())
        .set("lastActivity", to_value(&Utc::now())?)
        .when("status", record.status.as_str());
    store.merge(collections::MATCHES, &key, merge).await?;
    Ok(true)
}
