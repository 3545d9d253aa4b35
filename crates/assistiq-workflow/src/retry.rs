//! Activity retry policies.
//!
//! Activities are the retriable unit of work inside a workflow. The engine
//! owns the outer retry loop; [`run_activity`] is the same policy applied by
//! the in-process binding and by fallback execution paths.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// Server-side retry policy for a single activity.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub maximum_attempts: u32,
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            maximum_attempts: 3,
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry. `attempt` is 1-based; the first retry
    /// (attempt 2) waits `initial_interval`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.initial_interval
            .mul_f64(self.backoff_coefficient.powi(exp as i32))
    }
}

/// Execution options for one activity invocation.
#[derive(Debug, Clone, Copy)]
pub struct ActivityOptions {
    pub start_to_close_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            start_to_close_timeout: Duration::from_secs(5 * 60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Terminal failure of an activity after its retry budget is spent.
#[derive(Debug, Error)]
#[error("activity {activity} failed after {attempts} attempt(s): {last_error}")]
pub struct ActivityFailure {
    pub activity: String,
    pub attempts: u32,
    pub last_error: String,
}

/// Run an activity closure under timeout + retry.
///
/// The closure is re-invoked for every attempt, so it must be safe to retry
/// (activities are at-least-once by contract).
pub async fn run_activity<T, E, F, Fut>(
    name: &str,
    opts: ActivityOptions,
    mut activity: F,
) -> Result<T, ActivityFailure>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = tokio::time::timeout(opts.start_to_close_timeout, activity()).await;
        let last_error = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "timed out after {:?}",
                opts.start_to_close_timeout
            ),
        };

        if attempt >= opts.retry.maximum_attempts {
            return Err(ActivityFailure {
                activity: name.to_string(),
                attempts: attempt,
                last_error,
            });
        }

        let delay = opts.retry.delay_before(attempt);
        warn!(
            activity = name,
            attempt,
            error = %last_error,
            "activity attempt failed, retrying in {:?}",
            delay
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_opts(max_attempts: u32) -> ActivityOptions {
        ActivityOptions {
            start_to_close_timeout: Duration::from_millis(200),
            retry: RetryPolicy {
                maximum_attempts: max_attempts,
                initial_interval: Duration::from_millis(1),
                backoff_coefficient: 2.0,
            },
        }
    }

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(1), Duration::from_secs(1));
        assert_eq!(policy.delay_before(2), Duration::from_secs(2));
        assert_eq!(policy.delay_before(3), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = run_activity("flaky", fast_opts(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_retry_budget() {
        let result: Result<(), _> =
            run_activity("doomed", fast_opts(2), || async { Err("nope") }).await;
        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 2);
        assert!(failure.last_error.contains("nope"));
    }

    #[tokio::test]
    async fn timeout_counts_as_an_attempt() {
        let result: Result<(), _> = run_activity("slow", fast_opts(1), || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), &str>(())
        })
        .await;
        let failure = result.unwrap_err();
        assert!(failure.last_error.contains("timed out"));
    }
}
