//! Backoff schedule and the bounded retry loop used for listing.

use std::future::Future;
use std::time::Duration;

use proven_resource_api::ResourceApiError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryPolicy;

/// Produces successive, jittered delays for a `RetryPolicy`.
#[derive(Debug, Clone)]
pub struct Backoff {
    delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: f64,
}

impl Backoff {
    /// Starts a new schedule at the policy's initial delay.
    #[must_use]
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            delay: policy.initial_delay,
            max_delay: policy.max_delay,
            multiplier: policy.backoff_multiplier.max(1.0),
            jitter: policy.jitter.max(0.0),
        }
    }

    /// Returns the next delay and advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.scaled(fastrand::f64().mul_add(self.jitter, 1.0));
        self.delay = self.scaled(self.multiplier);

        delay
    }

    /// The current delay multiplied by `factor`, capped at the max delay.
    fn scaled(&self, factor: f64) -> Duration {
        Duration::try_from_secs_f64(self.delay.as_secs_f64() * factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Sleeps for `delay` unless cancelled first. Returns false if cancelled.
pub async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }

    cancel
        .run_until_cancelled(tokio::time::sleep(delay))
        .await
        .is_some()
}

/// Why `retry_on_error` gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The last error was not retryable, or the policy's bounds were reached.
    Failed {
        /// Number of attempts made.
        attempts: usize,
        /// The last error returned.
        source: E,
    },

    /// The cancellation token fired.
    Cancelled,
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, the
/// policy is exhausted, or `cancel` fires.
pub async fn retry_on_error<F, Fut, T, E>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation_name: &str,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: ResourceApiError,
{
    let started = Instant::now();
    let mut backoff = Backoff::new(policy);
    let mut attempts = 0;

    loop {
        attempts += 1;

        let error = match cancel.run_until_cancelled(operation()).await {
            None => return Err(RetryError::Cancelled),
            Some(Ok(result)) => {
                if attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts, "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Some(Err(error)) => error,
        };

        let out_of_time = policy
            .total_timeout
            .is_some_and(|total| started.elapsed() >= total);

        if !error.kind().is_retryable() || attempts >= policy.max_attempts || out_of_time {
            return Err(RetryError::Failed {
                attempts,
                source: error,
            });
        }

        let delay = error.retry_after().unwrap_or_else(|| backoff.next_delay());
        warn!(
            operation = operation_name,
            attempt = attempts,
            max_attempts = policy.max_attempts,
            delay = ?delay,
            error = %error,
            "Operation failed, retrying"
        );

        if !sleep_or_cancel(cancel, delay).await {
            return Err(RetryError::Cancelled);
        }
    }
}
