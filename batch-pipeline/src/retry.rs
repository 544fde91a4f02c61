use std::future::Future;

use common::error::{AppError, FailureKind};
use common::utils::duration_millis;
use tokio::time::{sleep, Duration};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::rate_limit::RateLimiter;

/// Successful call plus how many attempts it took (1 means no retries).
#[derive(Debug, Clone, Copy)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: u32,
}

/// Bounded exponential backoff around an upstream call. Rate-limit failures
/// back off twice as long as other transient failures; permanent failures
/// are returned immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retry_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub use_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            backoff_base: Duration::from_millis(1000),
            backoff_max: Duration::from_secs(30),
            use_jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay schedule: base, 2x base, 4x base, capped at `backoff_max`. One
    /// entry per permitted retry, so an always-failing call runs
    /// `max_retry_attempts + 1` times in total.
    pub fn backoff_delays(&self) -> Vec<Duration> {
        let base_ms = duration_millis(self.backoff_base);
        let delays = ExponentialBackoff::from_millis(2)
            .factor((base_ms / 2).max(1))
            .max_delay(self.backoff_max)
            .take(self.max_retry_attempts as usize);

        if self.use_jitter {
            delays.map(jitter).collect()
        } else {
            delays.collect()
        }
    }

    /// Runs `op` until it succeeds, fails permanently, runs out of retries,
    /// or the batch is cancelled. Every attempt re-acquires a rate permit,
    /// so retries compete with fresh requests instead of bypassing the
    /// limiter.
    pub async fn execute<T, F, Fut>(
        &self,
        limiter: &RateLimiter,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<RetryOutcome<T>, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut delays = self.backoff_delays().into_iter();
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled("batch cancelled".into()));
            }
            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(AppError::Cancelled("batch cancelled".into()));
                }
                () = limiter.acquire() => {}
            }

            attempts += 1;
            let result = tokio::select! {
                () = cancel.cancelled() => {
                    return Err(AppError::Cancelled("batch cancelled".into()));
                }
                result = op() => result,
            };

            let err = match result {
                Ok(value) => return Ok(RetryOutcome { value, attempts }),
                Err(err) => err,
            };

            let kind = err.failure_kind();
            if kind == FailureKind::Permanent {
                return Err(err);
            }
            let Some(delay) = delays.next() else {
                return Err(AppError::RetriesExhausted {
                    attempts,
                    source: Box::new(err),
                });
            };
            let delay = if kind == FailureKind::RateLimited {
                delay.saturating_mul(2).min(self.backoff_max)
            } else {
                delay
            };

            warn!(
                attempt = attempts,
                delay_ms = duration_millis(delay),
                error = %err,
                "upstream call failed, backing off"
            );
            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(AppError::Cancelled("batch cancelled".into()));
                }
                () = sleep(delay) => {}
            }
        }
    }
}
