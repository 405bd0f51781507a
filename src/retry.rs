//! Retry with capped exponential backoff and jitter.

use crate::error::PipelineError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Backoff schedule for retryable failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: usize,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Growth factor applied per attempt.
    pub multiplier: f64,

    /// Ceiling on any single delay, applied before jitter.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following failed attempt `attempt` (zero-based).
    /// Jitter scales the capped exponential delay by a random factor in
    /// [0.5, 1.0] to spread out synchronized retries.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exp = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(0.5..=1.0);
        Duration::from_secs_f64(capped * jitter)
    }
}

/// Run `op` until it succeeds, retrying only retryable errors.
///
/// Non-retryable errors and retryable errors on the final attempt are
/// returned verbatim. The closure receives the zero-based attempt number.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, PipelineError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    "attempt {} failed: {}, retrying in {:?}",
                    attempt + 1,
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(4),
        }
    }

    fn transient() -> PipelineError {
        PipelineError::from_io(io::Error::new(io::ErrorKind::WouldBlock, "busy"))
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(&fast_policy(), |_| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
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
    async fn test_exhausts_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = retry_with_backoff(&fast_policy(), |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            }
        })
        .await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = retry_with_backoff(&fast_policy(), |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::user("deterministic bug"))
            }
        })
        .await;

        assert!(matches!(
            result.unwrap_err(),
            PipelineError::UserFunction { .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_is_capped_and_jittered() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(500),
        };

        for attempt in 0..10 {
            let delay = policy.delay_for(attempt);
            assert!(delay <= Duration::from_millis(500));
            assert!(delay >= Duration::from_millis(25));
        }
    }
}
