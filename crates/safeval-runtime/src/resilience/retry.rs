//! Retry with exponential backoff.

use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::time::Duration;

use safeval_core::Stage;

use crate::error::ModelError;

/// How often and how patiently a failing call is retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
            .with_jitter()
    }

    /// Run `call`, retrying retryable model errors.
    pub async fn run<F, Fut, T>(&self, stage: Stage, call: F) -> Result<T, ModelError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModelError>>,
    {
        call.retry(self.backoff())
            .sleep(tokio::time::sleep)
            .when(ModelError::is_retryable)
            .notify(|err: &ModelError, delay: Duration| {
                tracing::debug!(stage = %stage, error = %err, delay = ?delay, "Retrying model call");
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let attempts = &AtomicU32::new(0);
        let result = fast(3)
            .run(Stage::Extract, move || async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ModelError::Unavailable("busy".to_string()))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let attempts = &AtomicU32::new(0);
        let result: Result<(), _> = fast(2)
            .run(Stage::Extract, move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ModelError::Unavailable("busy".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_errors_not_retried() {
        let attempts = &AtomicU32::new(0);
        let result: Result<(), _> = fast(5)
            .run(Stage::Classify, move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ModelError::Failed("bad prompt".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
