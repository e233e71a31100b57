/// Integration tests for resilience library
use resilience::{with_retry, with_retry_if, RetryConfig, RetryError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, PartialEq)]
enum StoreError {
    Conflict,
    Denied,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Conflict => write!(f, "conflict"),
            StoreError::Denied => write!(f, "denied"),
        }
    }
}

// ==================== Retry Tests ====================

#[tokio::test]
async fn test_exponential_backoff_elapsed() {
    let config = RetryConfig {
        max_retries: 3,
        initial_backoff: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        jitter: false,
        ..Default::default()
    };

    let start = std::time::Instant::now();

    let _ = with_retry(config, || async { Err::<i32, _>("error") }).await;

    // Expected: 10ms + 20ms + 40ms = 70ms minimum
    assert!(start.elapsed() >= Duration::from_millis(70));
}

#[tokio::test]
async fn test_conflicts_retried_then_denial_surfaces() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let config = RetryConfig {
        max_retries: 5,
        initial_backoff: Duration::from_millis(1),
        jitter: false,
        ..Default::default()
    };

    let result = with_retry_if(
        config,
        |e: &StoreError| *e == StoreError::Conflict,
        move || {
            let n = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err::<(), _>(StoreError::Conflict)
                } else {
                    Err(StoreError::Denied)
                }
            }
        },
    )
    .await;

    assert!(matches!(result, Err(RetryError::Permanent(StoreError::Denied))));
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_no_retry_config_fails_fast() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let result = with_retry(RetryConfig::no_retry(), move || {
        counter_clone.fetch_add(1, Ordering::SeqCst);
        async { Err::<(), _>(StoreError::Conflict) }
    })
    .await;

    let err = result.unwrap_err();
    assert_eq!(err.attempts(), Some(1));
    assert_eq!(err.into_inner(), StoreError::Conflict);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}
