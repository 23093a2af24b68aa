//! Bounded retry for upstream calls (embedding, generation)

use crate::errors::Result;
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(initial_backoff_ms.saturating_mul(16).max(1)),
        }
    }

    pub fn none() -> Self {
        Self::new(0, 0)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, 100)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent. Only `AppError::is_retryable` errors are retried.
pub async fn retry_transient<T, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.initial_backoff)
        .with_max_interval(policy.max_backoff)
        .with_max_elapsed_time(None)
        .build();

    let mut attempt = 0u32;
    retry(backoff, || {
        attempt += 1;
        let current = attempt;
        let fut = op();
        async move {
            match fut.await {
                Ok(value) => Ok(value),
                Err(e) if e.is_retryable() && current <= policy.max_retries => {
                    warn!(
                        operation = operation,
                        attempt = current,
                        max_retries = policy.max_retries,
                        error = %e,
                        "Upstream call failed, retrying"
                    );
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        }
    })
    .await
}
