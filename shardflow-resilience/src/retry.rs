//! Bounded retries of a fallible async operation
//!
//! The operation decides whether a failure may be retried through
//! [`Retryable`]. The policy only decides how often and how far apart.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;

/// How many times to run an operation and how long to wait in between
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    /// Three attempts one second apart
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::fixed(delay),
        }
    }

    /// Run exactly once
    pub fn no_retry() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// A failure that may or may not be worth another attempt
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Runs an operation under a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    label: String,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            label: String::new(),
        }
    }

    /// Name logged with every attempt
    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Run `f` until it succeeds, fails with a non-retryable error, or runs
    /// out of attempts. `f` receives the 1-indexed attempt number.
    pub async fn execute_with_context<F, Fut, T, E>(&self, mut f: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!(operation = %self.label, attempt, max_attempts, "Starting attempt");

            let error = match f(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation = %self.label, attempt, "Succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                debug!(operation = %self.label, attempt, "Not retrying: {}", error);
                return Err(RetryError::NonRetryable(error));
            }
            if attempt >= max_attempts {
                warn!(operation = %self.label, attempts = attempt, "Giving up: {}", error);
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last_error: error,
                });
            }

            let delay = self.policy.backoff.delay_after(attempt);
            warn!(
                operation = %self.label,
                attempt,
                delay = ?delay,
                "Attempt failed, retrying: {}",
                error
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("Gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: E },

    #[error("{0}")]
    NonRetryable(E),
}

impl<E> RetryError<E> {
    /// The error of the last attempt
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::NonRetryable(error) => error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct Flaky {
        retryable: bool,
    }

    impl fmt::Display for Flaky {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "flaky (retryable: {})", self.retryable)
        }
    }

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(RetryPolicy::fixed(3, Duration::from_millis(5)));

        let result = executor
            .execute_with_context(|attempt| {
                calls.fetch_add(1, Ordering::Relaxed);
                async move {
                    if attempt < 3 {
                        Err(Flaky { retryable: true })
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_exhausted_keeps_last_error() {
        let executor = RetryExecutor::new(RetryPolicy::fixed(2, Duration::from_millis(1))).labelled("t");

        let err = executor
            .execute_with_context(|_| async { Err::<(), _>(Flaky { retryable: true }) })
            .await
            .unwrap_err();

        assert!(matches!(err, RetryError::Exhausted { attempts: 2, .. }));
        assert!(err.to_string().starts_with("Gave up after 2 attempts"));
        assert!(err.into_inner().retryable);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(RetryPolicy::default());

        let err = executor
            .execute_with_context(|_| {
                calls.fetch_add(1, Ordering::Relaxed);
                async { Err::<(), _>(Flaky { retryable: false }) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RetryError::NonRetryable(_)));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let executor = RetryExecutor::new(RetryPolicy::fixed(0, Duration::ZERO));
        let result = executor
            .execute_with_context(|attempt| async move { Ok::<_, Flaky>(attempt) })
            .await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_policy_waits_one_second() {
        let executor = RetryExecutor::new(RetryPolicy::default());
        let start = tokio::time::Instant::now();

        let result = executor
            .execute_with_context(|attempt| async move {
                if attempt < 3 {
                    Err(Flaky { retryable: true })
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_growing_backoff() {
        let policy = RetryPolicy::fixed(4, Duration::ZERO).with_backoff(Backoff::growing(
            Duration::from_millis(100),
            2.0,
            Duration::from_millis(250),
        ));
        let start = tokio::time::Instant::now();

        let _ = RetryExecutor::new(policy)
            .execute_with_context(|_| async { Err::<(), _>(Flaky { retryable: true }) })
            .await;

        // 100ms + 200ms + 250ms
        assert_eq!(start.elapsed(), Duration::from_millis(550));
    }
}
