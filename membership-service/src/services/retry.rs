//! Workflow retry with exponential backoff.
//!
//! A workflow attempt that loses the invoice sequence race rolled back in full,
//! so the whole attempt is run again from a fresh transaction.

use crate::error::BillingError;
use crate::services::metrics::{record_error, record_workflow, WORKFLOW_RETRIES};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Retry attempts after the first one.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    fn backoff_duration(&self, attempt: u32) -> Duration {
        let backoff =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let backoff_ms = backoff.min(self.max_backoff.as_millis() as f64) as u64;

        let mut duration = Duration::from_millis(backoff_ms);

        if self.add_jitter {
            // Up to 25% so contending workflows spread out.
            let jitter = (backoff_ms as f64 * 0.25 * rand_jitter()) as u64;
            duration += Duration::from_millis(jitter);
        }

        duration
    }
}

fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Run a workflow attempt, retrying on invoice sequence conflicts.
///
/// Any other error is returned as-is after the first attempt. When retries
/// run out the conflict becomes [`BillingError::Sequencing`]. Workflow outcome
/// metrics are recorded here, once per call.
pub async fn run_with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation: &str,
    f: F,
) -> Result<T, BillingError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, BillingError>>,
{
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        operation = operation,
                        attempt = attempt + 1,
                        "Workflow succeeded after retry"
                    );
                }
                record_workflow(operation, "success");
                return Ok(result);
            }
            Err(err) if err.is_retryable() => {
                if attempt >= config.max_retries {
                    warn!(
                        operation = operation,
                        attempt = attempt + 1,
                        error = %err,
                        "Invoice sequence still contended after max retries"
                    );
                    record_workflow(operation, "error");
                    record_error("sequencing");
                    return Err(BillingError::Sequencing(anyhow::anyhow!(
                        "{} failed after {} attempts: {}",
                        operation,
                        attempt + 1,
                        err
                    )));
                }

                let backoff = config.backoff_duration(attempt);
                warn!(
                    operation = operation,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    "Invoice sequence conflict, retrying workflow"
                );
                WORKFLOW_RETRIES.with_label_values(&[operation]).inc();

                sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => {
                record_workflow(operation, "error");
                record_error(err.kind());
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            backoff_multiplier: 2.0,
            add_jitter: false,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = RetryConfig {
            add_jitter: false,
            ..Default::default()
        };
        assert_eq!(config.backoff_duration(0), Duration::from_millis(10));
        assert_eq!(config.backoff_duration(1), Duration::from_millis(20));
        assert_eq!(config.backoff_duration(10), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn sequence_conflict_is_retried_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = run_with_retry(&quick(3), "test_retry", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(BillingError::SequenceConflict(anyhow::anyhow!("duplicate")))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_become_sequencing_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = run_with_retry(&quick(2), "test_exhausted", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BillingError::SequenceConflict(anyhow::anyhow!("duplicate")))
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), "sequencing");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = run_with_retry(&quick(5), "test_conflict", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BillingError::Conflict(anyhow::anyhow!("deadlock")))
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), "conflict");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
