//! Bounded retry with exponential backoff for backend calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{MemoryError, Result, StorageError};

/// How backend calls are retried and bounded.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub initial_backoff: Duration,
    /// Ceiling for the doubled delay.
    pub max_backoff: Duration,
    /// Time budget for a single attempt.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            call_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Execute a backend call, retrying transient failures with exponential backoff.
///
/// Each attempt is bounded by `policy.call_timeout`; an attempt that overruns
/// counts as a transient [`StorageError::Timeout`]. Permanent errors (auth,
/// schema, validation, ...) are returned immediately.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let call_timeout = policy.call_timeout;
    retry_when(policy, operation, MemoryError::is_transient, || {
        let attempt = f();
        async move {
            match tokio::time::timeout(call_timeout, attempt).await {
                Ok(outcome) => outcome,
                Err(_) => Err(StorageError::Timeout(call_timeout).into()),
            }
        }
    })
    .await
}

/// Retry loop without a per-attempt timeout.
///
/// Failed attempts are retried with exponential backoff while
/// `should_retry` accepts the error and retries remain. Callers that cannot
/// cancel an attempt enforce their own deadline inside it.
pub async fn retry_when<F, Fut, T, P>(
    policy: &RetryPolicy,
    operation: &str,
    should_retry: P,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&MemoryError) -> bool,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if should_retry(&e) && attempt < policy.max_retries => {
                attempt += 1;
                warn!(
                    operation,
                    attempt,
                    max_retries = policy.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Backend call failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            call_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(3), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StorageError::Throttled("slow down".into()).into())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(2), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StorageError::Unavailable("down".into()).into()) }
        })
        .await;

        assert!(matches!(
            result,
            Err(MemoryError::Storage(StorageError::Unavailable(_)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(5), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StorageError::Auth("bad credentials".into()).into()) }
        })
        .await;

        assert!(matches!(
            result,
            Err(MemoryError::Storage(StorageError::Auth(_)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let policy = RetryPolicy {
            call_timeout: Duration::from_millis(10),
            ..fast_policy(0)
        };
        let result: Result<()> = with_retry(&policy, "test", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(
            result,
            Err(MemoryError::Storage(StorageError::Timeout(_)))
        ));
    }

    #[tokio::test]
    async fn test_retry_when_respects_predicate() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_when(
            &fast_policy(3),
            "test",
            |e| !matches!(e, MemoryError::Storage(StorageError::Timeout(_))),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StorageError::Timeout(Duration::from_millis(1)).into()) }
            },
        )
        .await;

        assert!(matches!(
            result,
            Err(MemoryError::Storage(StorageError::Timeout(_)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
