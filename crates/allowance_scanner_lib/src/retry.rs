//! Bounded retries with exponential backoff and a hard per-call timeout.

use crate::error::AllowanceError;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub tries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            tries: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay slept after the failed attempt with the given 0-based index.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

pub async fn with_timeout<T, F>(timeout: Duration, operation: F) -> Result<T, AllowanceError>
where
    F: Future<Output = Result<T, AllowanceError>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(res) => res,
        Err(_elapsed) => Err(AllowanceError::Timeout(timeout.as_millis())),
    }
}

pub async fn with_retry<T, F, O>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, AllowanceError>
where
    F: FnMut() -> O,
    O: Future<Output = Result<T, AllowanceError>>,
{
    let tries = policy.tries.max(1);
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt + 1 >= tries || !err.is_retryable() {
                    return Err(err);
                }
                let delay = policy.backoff_for_attempt(attempt);
                log::warn!(
                    "{} failed (attempt {}/{}), retrying in {} ms: {}",
                    label,
                    attempt + 1,
                    tries,
                    delay.as_millis(),
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Every network call of the engine goes through this: each attempt is
/// individually bounded by `timeout`.
pub async fn call_with_retry<T, F, O>(
    policy: &RetryPolicy,
    timeout: Duration,
    label: &str,
    mut operation: F,
) -> Result<T, AllowanceError>
where
    F: FnMut() -> O,
    O: Future<Output = Result<T, AllowanceError>>,
{
    with_retry(policy, label, || with_timeout(timeout, operation())).await
}
