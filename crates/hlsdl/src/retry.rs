// Bounded retry loop shared by segment and key fetching.
//
// Fixed delay between attempts, interruptible by cancellation.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::DownloadError;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, the first one included.
    pub max_attempts: u32,
    /// Pause between two consecutive attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

/// Result of a single attempt, used by the caller to signal retryability.
pub enum RetryAction<T> {
    /// Operation succeeded.
    Success(T),
    /// Operation failed with a transient error.
    Retry(DownloadError),
    /// Operation failed with a terminal error.
    Fail(DownloadError),
}

impl<T> From<Result<T, DownloadError>> for RetryAction<T> {
    fn from(result: Result<T, DownloadError>) -> Self {
        match result {
            Ok(value) => RetryAction::Success(value),
            Err(e) if e.is_retryable() => RetryAction::Retry(e),
            Err(e) => RetryAction::Fail(e),
        }
    }
}

/// Run `operation` until it succeeds, fails terminally, or the attempt budget
/// is spent. The token is checked before every attempt; an attempt that has
/// started always runs to completion.
///
/// `operation` receives the attempt number, starting at 1.
pub async fn retry_with_policy<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    mut operation: F,
) -> Result<T, DownloadError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        attempt += 1;

        let err = match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) => err,
        };

        if attempt >= max_attempts {
            return Err(err);
        }

        warn!(
            attempt,
            max = max_attempts,
            delay_ms = policy.delay.as_millis() as u64,
            error = %err,
            "Retrying after transient error"
        );
        tokio::select! {
            _ = token.cancelled() => {
                return Err(DownloadError::Cancelled);
            }
            _ = tokio::time::sleep(policy.delay) => {}
        }
    }
}
