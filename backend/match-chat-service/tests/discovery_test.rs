mod common;

use async_trait::async_trait;
use common::{eventually, fast_retry, Harness, RecordingDispatcher};
use match_chat_service::error::{AppError, AppResult};
use match_chat_service::metrics::DISCOVERY_FALLBACKS_TOTAL;
use match_chat_service::models::canonical::{interest_id, match_id};
use match_chat_service::models::{EventInterestIndex, Interest, MatchStatus};
use match_chat_service::services::discovery::{DiscoveryStrategy, ScanStrategy, StrategyOutcome};
use match_chat_service::services::notification::NotificationEventType;
use match_chat_service::services::{FixedWindowQuota, MatchDiscoveryEngine, UnlimitedQuota};
use match_chat_service::store::{collections, decode, DocumentStore, Fault, FaultOp, MemoryStore};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

/// Scan strategy that counts how often it runs.
struct CountingStrategy {
    inner: ScanStrategy,
    calls: AtomicUsize,
}

impl CountingStrategy {
    fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            inner: ScanStrategy::new(store),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiscoveryStrategy for CountingStrategy {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn discover(&self, user_id: Uuid) -> AppResult<StrategyOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.discover(user_id).await
    }

    async fn discover_event(&self, user_id: Uuid, event_id: Uuid) -> AppResult<StrategyOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.discover_event(user_id, event_id).await
    }
}

#[tokio::test]
async fn test_reciprocal_interest_creates_single_match() {
    let h = Harness::new();
    let (a, b, event) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    assert!(h.discovery.declare_interest(a, event).await.unwrap().is_empty());
    let found = h.discovery.declare_interest(b, event).await.unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].match_id, match_id(a, b).unwrap());
    assert_eq!(found[0].shared_events, BTreeSet::from([event]));
    assert_eq!(found[0].strength, 50);

    let for_a = h.discovery.list_matches(a).await.unwrap();
    let for_b = h.discovery.list_matches(b).await.unwrap();
    assert_eq!(for_a.len(), 1);
    assert_eq!(for_a, for_b);
    assert_eq!(for_a[0].status, MatchStatus::Pending);
    assert_eq!(h.store.len(collections::MATCHES).await, 1);
}

#[tokio::test]
async fn test_declaration_order_does_not_change_match_id() {
    let event = Uuid::new_v4();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let first = Harness::new();
    first.discovery.declare_interest(a, event).await.unwrap();
    let forward = first.discovery.declare_interest(b, event).await.unwrap();

    let second = Harness::new();
    second.discovery.declare_interest(b, event).await.unwrap();
    let reverse = second.discovery.declare_interest(a, event).await.unwrap();

    assert_eq!(forward[0].match_id, reverse[0].match_id);
    assert_eq!(forward[0].participants, reverse[0].participants);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_declarations_converge_on_one_record() {
    let h = Arc::new(Harness::new());
    let event = Uuid::new_v4();
    let users: Vec<Uuid> = (0..6).map(|_| Uuid::new_v4()).collect();

    let handles: Vec<_> = users
        .iter()
        .map(|&user| {
            let h = h.clone();
            tokio::spawn(async move { h.discovery.declare_interest(user, event).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Every pair of the six shares the event exactly once
    assert_eq!(h.store.len(collections::MATCHES).await, 15);
    for &user in &users {
        let matches = h.discovery.list_matches(user).await.unwrap();
        assert_eq!(matches.len(), 5);
        for record in matches {
            assert_eq!(record.shared_events, BTreeSet::from([event]));
            assert_eq!(record.strength, 50);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_upserts_union_shared_events() {
    let h = Arc::new(Harness::new());
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let events: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();

    let handles: Vec<_> = events
        .iter()
        .map(|&event| {
            let h = h.clone();
            tokio::spawn(async move {
                h.discovery
                    .create_match_if_absent(a, b, &BTreeSet::from([event]))
                    .await
            })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().created {
            created += 1;
        }
    }
    assert_eq!(created, 1);

    let record = h.discovery.get_match(match_id(a, b).unwrap(), a).await.unwrap();
    assert_eq!(record.shared_events.len(), 4);
    assert_eq!(record.strength, 95);
}

#[tokio::test]
async fn test_repeated_declarations_and_scans_are_idempotent() {
    let h = Harness::new();
    let (a, b, event) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    for _ in 0..2 {
        h.discovery.declare_interest(a, event).await.unwrap();
        h.discovery.declare_interest(b, event).await.unwrap();
    }
    for _ in 0..2 {
        h.discovery.find_mutual_matches(a).await.unwrap();
    }

    assert_eq!(h.store.len(collections::INTERESTS).await, 2);
    assert_eq!(h.store.len(collections::MATCHES).await, 1);
    let record = h.discovery.get_match(match_id(a, b).unwrap(), a).await.unwrap();
    assert_eq!(record.shared_events, BTreeSet::from([event]));
    assert_eq!(record.strength, 50);

    assert!(
        eventually(Duration::from_secs(1), || async {
            h.notifier.count(NotificationEventType::MatchCreated) == 2
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.notifier.count(NotificationEventType::MatchCreated), 2);
}

#[tokio::test]
async fn test_shared_events_are_the_intersection() {
    let h = Harness::new();
    let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let (e1, e2, e3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    for (user, events) in [(alice, [e1, e2]), (bob, [e2, e3]), (carol, [e1, e2])] {
        for event in events {
            h.discovery.declare_interest(user, event).await.unwrap();
        }
    }

    let report = h.discovery.find_mutual_matches(alice).await.unwrap();
    assert_eq!(report.failures, 0);
    assert_eq!(report.candidates.len(), 2);

    let with_bob = report
        .candidates
        .iter()
        .find(|m| m.participants.contains(bob))
        .unwrap();
    assert_eq!(with_bob.shared_events, BTreeSet::from([e2]));
    assert_eq!(with_bob.strength, 50);

    let with_carol = report
        .candidates
        .iter()
        .find(|m| m.participants.contains(carol))
        .unwrap();
    assert_eq!(with_carol.shared_events, BTreeSet::from([e1, e2]));
    assert_eq!(with_carol.strength, 75);
}

#[tokio::test]
async fn test_unavailable_index_falls_back_to_scan() {
    let h = Harness::new();
    let (a, b, event) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let fallbacks_before = DISCOVERY_FALLBACKS_TOTAL
        .with_label_values(&["indexed"])
        .get();

    h.store
        .fail_reads(collections::EVENT_INTERESTS, Fault::IndexUnavailable, None)
        .await;
    h.discovery.declare_interest(a, event).await.unwrap();
    let found = h.discovery.declare_interest(b, event).await.unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].match_id, match_id(a, b).unwrap());
    assert!(
        DISCOVERY_FALLBACKS_TOTAL
            .with_label_values(&["indexed"])
            .get()
            > fallbacks_before
    );

    let report = h.discovery.find_mutual_matches(a).await.unwrap();
    assert_eq!(report.candidates.len(), 1);
    assert_eq!(h.store.len(collections::MATCHES).await, 1);
}

/// Index entry for `event`, if any.
async fn indexed_users(store: &MemoryStore, event: Uuid) -> Vec<Uuid> {
    match store.get(collections::EVENT_INTERESTS, &event.to_string()).await.unwrap() {
        Some(doc) => decode::<EventInterestIndex>(doc).unwrap().users.into_iter().collect(),
        None => Vec::new(),
    }
}

async fn interest_record(store: &MemoryStore, user: Uuid, event: Uuid) -> Interest {
    let doc = store
        .get(collections::INTERESTS, &interest_id(user, event).to_string())
        .await
        .unwrap()
        .unwrap();
    decode(doc).unwrap()
}

#[tokio::test]
async fn test_lagging_index_falls_back_to_scan() {
    let h = Harness::new();
    let (a, b, event) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    h.discovery.declare_interest(a, event).await.unwrap();

    // B's interest is recorded but never reaches the index
    h.store
        .fail_writes(collections::EVENT_INTERESTS, Fault::Network, None)
        .await;
    let err = h.discovery.declare_interest(b, event).await.unwrap_err();
    assert!(matches!(err, AppError::NetworkError(_)), "{err:?}");
    h.store.clear_faults().await;

    assert!(!interest_record(&h.store, b, event).await.indexed);
    assert!(!indexed_users(&h.store, event).await.contains(&b));

    let report = h.discovery.find_mutual_matches(a).await.unwrap();
    assert_eq!(report.candidates.len(), 1);
    assert_eq!(report.candidates[0].match_id, match_id(a, b).unwrap());

    // The scan fallback put B back into the index
    assert!(indexed_users(&h.store, event).await.contains(&b));
    assert!(interest_record(&h.store, b, event).await.indexed);
}

#[tokio::test]
async fn test_peer_missing_from_index_yields_one_match() {
    let event = Uuid::new_v4();

    for always_scan in [false, true] {
        let store = Arc::new(MemoryStore::new());
        let engine = MatchDiscoveryEngine::new(
            store.clone(),
            Arc::new(UnlimitedQuota),
            Arc::new(RecordingDispatcher::default()),
        )
        .with_always_scan(always_scan)
        .with_retry(fast_retry(0));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        store
            .fail_writes(collections::EVENT_INTERESTS, Fault::Network, Some(1))
            .await;
        assert_err!(engine.declare_interest(b, event).await);

        // The index lists A only; B's unflagged record forces the scan
        let found = engine.declare_interest(a, event).await.unwrap();
        assert_eq!(found.len(), 1, "always_scan={always_scan}");
        assert_eq!(found[0].match_id, match_id(a, b).unwrap());

        let report = engine.find_mutual_matches(a).await.unwrap();
        assert_eq!(report.candidates.len(), 1, "always_scan={always_scan}");
        assert_eq!(store.len(collections::MATCHES).await, 1, "always_scan={always_scan}");

        let users = indexed_users(&store, event).await;
        assert!(users.contains(&a) && users.contains(&b), "always_scan={always_scan}");
    }
}

#[tokio::test]
async fn test_index_write_is_retried() {
    let store = Arc::new(MemoryStore::new());
    let engine = MatchDiscoveryEngine::new(
        store.clone(),
        Arc::new(UnlimitedQuota),
        Arc::new(RecordingDispatcher::default()),
    )
    .with_retry(fast_retry(2));
    let (user, event) = (Uuid::new_v4(), Uuid::new_v4());

    store
        .fail_writes(collections::EVENT_INTERESTS, Fault::Network, Some(1))
        .await;
    assert_ok!(engine.declare_interest(user, event).await);

    assert_eq!(indexed_users(&store, event).await, vec![user]);
    assert!(interest_record(&store, user, event).await.indexed);
}

#[tokio::test]
async fn test_redeclaring_repairs_index() {
    let h = Harness::new();
    let (user, event) = (Uuid::new_v4(), Uuid::new_v4());

    h.store
        .fail_writes(collections::EVENT_INTERESTS, Fault::Network, None)
        .await;
    assert_err!(h.discovery.declare_interest(user, event).await);
    h.store.clear_faults().await;

    assert_ok!(h.discovery.declare_interest(user, event).await);
    assert_eq!(indexed_users(&h.store, event).await, vec![user]);
    assert_eq!(h.store.len(collections::INTERESTS).await, 1);
}

#[tokio::test]
async fn test_quota_denial_runs_no_discovery() {
    let store = Arc::new(MemoryStore::new());
    let primary = Arc::new(CountingStrategy::new(store.clone()));
    let fallback = Arc::new(CountingStrategy::new(store.clone()));
    let engine = MatchDiscoveryEngine::new(
        store.clone(),
        Arc::new(FixedWindowQuota::new(1, Duration::from_secs(3600), Vec::new())),
        Arc::new(RecordingDispatcher::default()),
    )
    .with_strategies(primary.clone(), fallback.clone())
    .with_retry(fast_retry(0));
    let user = Uuid::new_v4();

    engine.find_mutual_matches(user).await.unwrap();
    assert_eq!(primary.calls(), 1);

    let err = engine.find_mutual_matches(user).await.unwrap_err();
    assert!(matches!(err, AppError::QuotaExceeded));
    assert!(!err.is_retryable());
    assert_eq!(primary.calls(), 1);
    assert_eq!(fallback.calls(), 0);

    // Other users keep their own window
    engine.find_mutual_matches(Uuid::new_v4()).await.unwrap();
    assert_eq!(primary.calls(), 2);
}

#[tokio::test]
async fn test_candidate_failure_does_not_abort_pass() {
    let h = Harness::new();
    let (a, b, c, event) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let broken = match_id(a, b).unwrap().to_string();

    h.store
        .fail_document(collections::MATCHES, &broken, FaultOp::Write, Fault::Network, None)
        .await;
    for user in [a, b, c] {
        h.discovery.declare_interest(user, event).await.unwrap();
    }

    let report = h.discovery.find_mutual_matches(a).await.unwrap();
    assert_eq!(report.failures, 1);
    assert_eq!(report.candidates.len(), 1);
    assert!(report.candidates[0].participants.contains(c));

    h.store.clear_faults().await;
    let report = h.discovery.find_mutual_matches(a).await.unwrap();
    assert_eq!(report.failures, 0);
    assert_eq!(report.candidates.len(), 2);
}

#[tokio::test]
async fn test_status_transitions() {
    let h = Harness::new();
    let (a, b, outsider) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let upsert = h
        .discovery
        .create_match_if_absent(a, b, &BTreeSet::from([Uuid::new_v4()]))
        .await
        .unwrap();
    let id = upsert.record.id;

    let err = h
        .discovery
        .transition_match(id, outsider, MatchStatus::Accepted)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotAuthorized));

    let declined = h
        .discovery
        .transition_match(id, b, MatchStatus::Declined)
        .await
        .unwrap();
    assert_eq!(declined.status, MatchStatus::Declined);

    let err = h
        .discovery
        .transition_match(id, a, MatchStatus::Accepted)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::InvalidTransition {
            from: MatchStatus::Declined,
            to: MatchStatus::Accepted
        }
    ));

    h.discovery
        .transition_match(id, a, MatchStatus::Expired)
        .await
        .unwrap();
    let err = h
        .discovery
        .transition_match(id, a, MatchStatus::Pending)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));

    let err = h
        .discovery
        .transition_match(Uuid::new_v4(), a, MatchStatus::Accepted)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::RecordNotFound(_)));
}

#[tokio::test]
async fn test_expire_stale_matches_only_touches_idle_pending() {
    let h = Harness::new();
    let events = BTreeSet::from([Uuid::new_v4()]);
    let stale = h
        .discovery
        .create_match_if_absent(Uuid::new_v4(), Uuid::new_v4(), &events)
        .await
        .unwrap()
        .record;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let accepted = h
        .discovery
        .create_match_if_absent(a, b, &events)
        .await
        .unwrap()
        .record;
    h.discovery
        .transition_match(accepted.id, a, MatchStatus::Accepted)
        .await
        .unwrap();

    assert_eq!(
        h.discovery
            .expire_stale_matches(Duration::from_secs(3600))
            .await
            .unwrap(),
        0
    );

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        h.discovery
            .expire_stale_matches(Duration::from_millis(1))
            .await
            .unwrap(),
        1
    );

    let participant = stale.participant_a;
    let record = h.discovery.get_match(stale.id, participant).await.unwrap();
    assert_eq!(record.status, MatchStatus::Expired);
    let record = h.discovery.get_match(accepted.id, a).await.unwrap();
    assert_eq!(record.status, MatchStatus::Accepted);
}

#[tokio::test]
async fn test_get_match_requires_participant() {
    let h = Harness::new();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let record = h
        .discovery
        .create_match_if_absent(a, b, &BTreeSet::from([Uuid::new_v4()]))
        .await
        .unwrap()
        .record;

    assert!(h.discovery.get_match(record.id, b).await.is_ok());
    assert!(matches!(
        h.discovery.get_match(record.id, Uuid::new_v4()).await,
        Err(AppError::NotAuthorized)
    ));
}
