//! Bounded fixed-interval retry.
//!
//! Every polling loop in the workspace (reachability probing, job status
//! polling, TCP readiness) is expressed through [`retry_bounded`]. The
//! loop owns the attempt budget, the inter-attempt delay and the
//! cancellation checks; callers only decide what a single attempt means.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Delay between reachability probes.
pub const DEFAULT_REACHABILITY_INTERVAL: Duration = Duration::from_millis(50);

/// Reachability probe budget. 500 x 50ms gives the server ~25s to boot.
pub const DEFAULT_REACHABILITY_MAX_ATTEMPTS: u32 = 500;

/// Delay between job status polls.
pub const DEFAULT_COMPLETION_INTERVAL: Duration = Duration::from_millis(250);

/// Job status poll budget.
pub const DEFAULT_COMPLETION_MAX_ATTEMPTS: u32 = 1000;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Attempt budget plus a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    interval: Duration,
}

impl RetryPolicy {
    /// Build a policy. `max_attempts` must be at least 1.
    pub fn new(max_attempts: u32, interval: Duration) -> Result<Self, CoreError> {
        if max_attempts == 0 {
            return Err(CoreError::Validation(
                "max_attempts must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            interval,
        })
    }

    /// Policy used while waiting for the subordinate service to come up.
    pub fn reachability() -> Self {
        Self {
            max_attempts: DEFAULT_REACHABILITY_MAX_ATTEMPTS,
            interval: DEFAULT_REACHABILITY_INTERVAL,
        }
    }

    /// Policy used while waiting for a submitted job to finish.
    pub fn completion() -> Self {
        Self {
            max_attempts: DEFAULT_COMPLETION_MAX_ATTEMPTS,
            interval: DEFAULT_COMPLETION_INTERVAL,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

// ---------------------------------------------------------------------------
// Retry loop
// ---------------------------------------------------------------------------

/// Result of a single attempt.
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// Stop with a value.
    Done(T),
    /// Spend the attempt and try again after the interval.
    Retry,
    /// Stop immediately with an error; remaining budget is discarded.
    Abort(E),
}

/// Why [`retry_bounded`] did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("aborted: {0}")]
    Aborted(E),

    #[error("cancelled")]
    Cancelled,
}

/// Run `op` up to `policy.max_attempts()` times.
///
/// `op` receives the 1-based attempt number. The cancellation token is
/// checked before every attempt and raced against each sleep. No sleep
/// follows the final attempt.
pub async fn retry_bounded<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        match op(attempt).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Abort(err) => return Err(RetryError::Aborted(err)),
            Attempt::Retry => {}
        }

        if attempt < policy.max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(policy.interval) => {}
            }
        }
    }

    Err(RetryError::Exhausted {
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use assert_matches::assert_matches;

    use super::*;

    fn policy(max_attempts: u32, interval_ms: u64) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(interval_ms)).unwrap()
    }

    #[test]
    fn zero_attempts_rejected() {
        assert_matches!(
            RetryPolicy::new(0, Duration::ZERO),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn defaults_poll_reachability_more_often() {
        let reach = RetryPolicy::reachability();
        let done = RetryPolicy::completion();
        assert!(reach.interval() < done.interval());
        assert_eq!(reach.max_attempts(), 500);
        assert_eq!(done.max_attempts(), 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_exact_budget() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result: Result<(), RetryError<()>> =
            retry_bounded(&policy(4, 100), &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Attempt::Retry }
            })
            .await;

        assert_matches!(result, Err(RetryError::Exhausted { attempts: 4 }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_first_success() {
        let calls = AtomicU32::new(0);

        let result: Result<u32, RetryError<()>> =
            retry_bounded(&policy(10, 50), &CancellationToken::new(), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 3 {
                        Attempt::Done(attempt)
                    } else {
                        Attempt::Retry
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn abort_discards_remaining_budget() {
        let calls = AtomicU32::new(0);

        let result: Result<(), RetryError<&str>> =
            retry_bounded(&policy(10, 0), &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Attempt::Abort("boom") }
            })
            .await;

        assert_matches!(result, Err(RetryError::Aborted("boom")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);

        let result: Result<(), RetryError<()>> = retry_bounded(&policy(3, 0), &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Attempt::Retry }
        })
        .await;

        assert_matches!(result, Err(RetryError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_sleep() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let result: Result<(), RetryError<()>> =
            retry_bounded(&policy(3, 60_000), &cancel, |_| async { Attempt::Retry }).await;

        assert_matches!(result, Err(RetryError::Cancelled));
    }
}
