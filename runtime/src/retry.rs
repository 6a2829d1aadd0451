//! Retry with exponential backoff for transient startup and I/O failures.
//!
//! Uses the same [`RetryPolicy`] the job queue uses for rescheduling, so a
//! single configuration governs every backoff in the process.
//!
//! # Example
//!
//! ```rust
//! use orderdesk_core::retry::RetryPolicy;
//! use orderdesk_runtime::retry::retry_with_backoff;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::new()
//!     .with_max_attempts(5)
//!     .with_initial_delay(Duration::from_millis(100))
//!     .with_max_delay(Duration::from_secs(10));
//!
//! let value = retry_with_backoff(
//!     &policy,
//!     || async { Ok::<_, std::io::Error>(42) },
//!     |e| e.kind() == std::io::ErrorKind::ConnectionRefused,
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

use orderdesk_core::retry::RetryPolicy;
use std::future::Future;
use tokio::time::sleep;

/// Run `operation` until it succeeds, `policy` runs out of attempts, or it
/// fails with an error for which `is_retryable` returns `false`.
///
/// # Errors
///
/// The first non-retryable error, or the error of the final attempt.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    tracing::info!(attempts, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::warn!(error = %err, "Error is not retryable, failing immediately");
                    return Err(err);
                }

                if !policy.should_retry(attempts) {
                    tracing::error!(attempts, error = %err, "Operation failed after max attempts");
                    return Err(err);
                }

                let delay = policy.backoff_after(attempts);
                tracing::warn!(
                    attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Operation failed, retrying..."
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(max_attempts)
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
            .with_jitter(false)
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(
            &fast_policy(5),
            || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 { Err(format!("attempt {n} failed")) } else { Ok(n) }
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = retry_with_backoff(
            &fast_policy(3),
            || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(format!("attempt {n} failed"))
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap_err(), "attempt 3 failed");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_fast() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = retry_with_backoff(
            &fast_policy(5),
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("bad credentials".to_string())
                }
            },
            |e| !e.contains("credentials"),
        )
        .await;

        assert_eq!(result.unwrap_err(), "bad credentials");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_errors_then_stops_on_fatal_one() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = retry_with_backoff(
            &fast_policy(10),
            || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    let message = if n < 3 { "connection refused" } else { "bad credentials" };
                    Err(message.to_string())
                }
            },
            |e| e.contains("refused"),
        )
        .await;

        assert_eq!(result.unwrap_err(), "bad credentials");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
