//! Bounded retry with exponential backoff for summarizer calls.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tracing::{debug, warn};

use crate::error::SummarizationError;

/// Retry policy applied to each summarizer call
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Wall-clock budget for a single attempt
    pub timeout: Duration,
    /// Decides whether a failure is worth another attempt
    pub retry_if: fn(&SummarizationError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            timeout: Duration::from_secs(60),
            retry_if: SummarizationError::is_transient,
        }
    }
}

impl RetryPolicy {
    /// Policy that makes exactly one attempt
    pub fn no_retry(timeout: Duration) -> Self {
        Self {
            max_retries: 0,
            timeout,
            ..Self::default()
        }
    }

    /// Backoff schedule without jitter
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            randomization_factor: 0.0,
            multiplier: self.multiplier,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Each attempt is bounded by `timeout`; an elapsed timeout counts as a
    /// transient failure. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, SummarizationError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, SummarizationError>>,
    {
        let mut backoff = self.backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let outcome = match tokio::time::timeout(self.timeout, op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(SummarizationError::transient(format!(
                    "timed out after {:?}",
                    self.timeout
                ))),
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !(self.retry_if)(&err) {
                debug!(attempt, error = %err, "not retrying");
                return Err(err);
            }

            if attempt >= self.max_attempts() {
                warn!(attempts = attempt, error = %err, "retries exhausted");
                return Err(err);
            }

            let delay = backoff.next_backoff().unwrap_or(self.max_delay);
            warn!(attempt, ?delay, error = %err, "transient failure, retrying");
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn close_to(actual: Duration, expected: Duration) -> bool {
        let diff = if actual > expected {
            actual - expected
        } else {
            expected - actual
        };
        diff < Duration::from_millis(1)
    }

    #[test]
    fn test_backoff_schedule_doubles_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
            ..RetryPolicy::default()
        };
        let mut backoff = policy.backoff();
        let delays: Vec<Duration> = (0..4).filter_map(|_| backoff.next_backoff()).collect();

        assert_eq!(delays.len(), 4);
        assert!(close_to(delays[0], Duration::from_secs(1)));
        assert!(close_to(delays[1], Duration::from_secs(2)));
        assert!(close_to(delays[2], Duration::from_secs(3)));
        assert!(close_to(delays[3], Duration::from_secs(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retry_twice() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = RetryPolicy::default()
            .run(|_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(SummarizationError::transient("503"))
                }
            })
            .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = RetryPolicy::default()
            .run(|_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(SummarizationError::permanent("401"))
                }
            })
            .await;

        assert_eq!(result, Err(SummarizationError::permanent("401")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let result = RetryPolicy::default()
            .run(|attempt| async move {
                if attempt < 2 {
                    Err(SummarizationError::transient("429"))
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_transient() {
        let policy = RetryPolicy {
            timeout: Duration::from_secs(1),
            ..RetryPolicy::default()
        };
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = policy
            .run(|_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                }
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("timed out"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_no_retry_policy() {
        let policy = RetryPolicy::no_retry(Duration::from_secs(5));
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.timeout, Duration::from_secs(5));
    }
}
