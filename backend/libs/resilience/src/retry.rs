/// Retry policy with exponential backoff and jitter
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first call)
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Add random jitter to backoff (±30%)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Config that never retries; useful in tests and for callers that must fail fast.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error; carries the last one.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
    /// The predicate classified the error as permanent.
    #[error("permanent failure: {0}")]
    Permanent(E),
}

impl<E> RetryError<E> {
    /// The underlying operation error, whichever way retrying ended.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Permanent(e) => e,
        }
    }

    pub fn attempts(&self) -> Option<u32> {
        match self {
            RetryError::Exhausted { attempts, .. } => Some(*attempts),
            RetryError::Permanent(_) => None,
        }
    }
}

/// Execute a future with retry logic, retrying every error.
pub async fn with_retry<F, Fut, T, E>(config: RetryConfig, f: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    with_retry_if(config, |_| true, f).await
}

/// Execute a future with retry logic, retrying only errors for which
/// `should_retry` returns true.
pub async fn with_retry_if<F, Fut, T, E, P>(
    config: RetryConfig,
    should_retry: P,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !should_retry(&e) => return Err(RetryError::Permanent(e)),
            Err(e) => {
                attempt += 1;

                if attempt > config.max_retries {
                    warn!(error = %e, "Max retries ({}) reached", config.max_retries);
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    });
                }

                let delay = jittered(backoff_for_attempt(&config, attempt), config.jitter);

                warn!(
                    error = %e,
                    "Retry attempt {}/{}, waiting {:?}",
                    attempt, config.max_retries, delay
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Backoff before retry number `attempt` (1-based), without jitter.
pub fn backoff_for_attempt(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1) as i32;
    let millis = config.initial_backoff.as_millis() as f64 * config.backoff_multiplier.powi(exponent);
    let capped = millis.min(config.max_backoff.as_millis() as f64);
    Duration::from_millis(capped as u64)
}

fn jittered(base: Duration, jitter: bool) -> Duration {
    if jitter {
        let jitter_factor = 1.0 + rand::rng().random_range(-0.3..0.3); // ±30%
        Duration::from_millis((base.as_millis() as f64 * jitter_factor) as u64)
    } else {
        base
    }
}
