//! Bounded retry for configfs entries that appear asynchronously.
//!
//! The kernel may create an attribute file some time after its parent
//! directory was made, so writes to it are retried with a fixed (or
//! exponentially growing) delay until an attempt budget runs out.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Attempt budget and spacing for a retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub delay: Duration,
    /// Factor applied to the delay after each failed attempt (1 = fixed)
    pub backoff_multiplier: u32,
    /// Upper bound for the delay
    pub max_delay: Duration,
}

/// Final error of a retried operation.
#[derive(Debug)]
pub struct RetryError<E> {
    /// Number of attempts made
    pub attempts: u32,
    /// Error returned by the last attempt
    pub error: E,
    /// True if the attempt budget ran out, false if the error was not retryable
    pub exhausted: bool,
}

impl RetryPolicy {
    /// Fixed delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            backoff_multiplier: 1,
            max_delay: delay,
        }
    }

    /// Grow the delay by `multiplier` after each attempt, capped at `max_delay`.
    pub fn with_backoff(mut self, multiplier: u32, max_delay: Duration) -> Self {
        self.backoff_multiplier = multiplier.max(1);
        self.max_delay = max_delay.max(self.delay);
        self
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let mut delay = self.delay;
        for _ in 1..attempt {
            if delay >= self.max_delay {
                break;
            }
            delay = delay.saturating_mul(self.backoff_multiplier);
        }
        delay.min(self.max_delay.max(self.delay))
    }

    /// Run `operation` until it succeeds, fails with an error `retryable`
    /// rejects, or the attempt budget is used up.
    ///
    /// On success returns the value and the number of attempts it took.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        operation_name: &str,
        mut retryable: P,
        mut operation: F,
    ) -> Result<(T, u32), RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
        E: Display,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok((value, attempt)),
                Err(error) => {
                    if !retryable(&error) {
                        return Err(RetryError {
                            attempts: attempt,
                            error,
                            exhausted: false,
                        });
                    }
                    if attempt >= self.max_attempts {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %error,
                            "Operation failed after retries"
                        );
                        return Err(RetryError {
                            attempts: attempt,
                            error,
                            exhausted: true,
                        });
                    }

                    let delay = self.delay_after(attempt);
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Not ready yet, retrying"
                    );

                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(10, Duration::from_secs(1))
    }
}
