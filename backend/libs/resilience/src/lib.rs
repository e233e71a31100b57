/// Resilience helpers shared by backend services
///
/// Currently provides **retry with exponential backoff and jitter** for
/// transient failures (write conflicts, dropped connections). Callers decide
/// which errors are transient through a predicate, so permanent failures such
/// as authorization denials surface immediately.
///
/// # Example
///
/// ```rust,no_run
/// use resilience::{with_retry_if, RetryConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let result = with_retry_if(
///         RetryConfig::default(),
///         |e: &String| e.starts_with("conflict"),
///         || async { Ok::<_, String>(()) },
///     )
///     .await;
///     assert!(result.is_ok());
/// }
/// ```

pub mod retry;

pub use retry::{backoff_for_attempt, with_retry, with_retry_if, RetryConfig, RetryError};
