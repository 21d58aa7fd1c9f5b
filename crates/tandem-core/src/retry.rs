//! Generic retry primitive with exponential backoff and jitter.
//!
//! Wraps an async operation and re-invokes it on failure: delay doubles each
//! attempt from `base_delay_ms`, is capped at `max_delay_ms`, and gets a
//! proportional random jitter added on top. A predicate decides whether a
//! given error is worth retrying. Exhaustion is an explicit error value
//! carrying the attempt count and the last cause, never a panic.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;

/// Backoff parameters for [`with_retry`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1).
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction of the computed delay added as random jitter.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): exponential growth
    /// capped at `max_delay_ms`, plus proportional jitter.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let exponential = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(32))
            .min(self.max_delay_ms);
        let jitter = (exponential as f64 * self.jitter_factor * rand::rng().random::<f64>()) as u64;
        exponential + jitter
    }
}

/// All attempts failed.
#[derive(Debug, Error)]
#[error("operation failed after {attempts} attempts: {source}")]
pub struct RetryError<E: std::error::Error + 'static> {
    /// Total attempts made (including the first).
    pub attempts: u32,
    #[source]
    pub source: E,
}

/// Run `operation` with retries per `policy`. `is_retryable` gates which
/// errors trigger another attempt; a non-retryable error is surfaced
/// immediately with the attempts made so far.
pub async fn with_retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, RetryError<E>>
where
    E: std::error::Error + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let attempts = attempt + 1;
                if attempt >= policy.max_retries || !is_retryable(&err) {
                    return Err(RetryError {
                        attempts,
                        source: err,
                    });
                }
                let delay = policy.delay_ms(attempt);
                tracing::debug!(
                    attempt = attempts,
                    delay_ms = delay,
                    error = %err,
                    "retrying after failure"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
        }
    }
}
