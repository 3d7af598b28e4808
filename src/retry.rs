//! Retry logic with exponential backoff, shared by the LLM executor.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_secs: 1,
            max_delay_secs: 60,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: usize, initial_delay_secs: u64, max_delay_secs: u64, multiplier: f64) -> Self {
        Self { max_retries, initial_delay_secs, max_delay_secs, multiplier }
    }

    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        let delay_secs = (self.initial_delay_secs as f64) * self.multiplier.powi(attempt as i32);
        let capped_delay = delay_secs.min(self.max_delay_secs as f64);
        Duration::from_secs(capped_delay as u64)
    }
}

/// Execute `operation` with retry logic, sleeping between attempts per
/// `config`'s exponential backoff schedule.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    op_id: &str,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let mut last_error = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = config.calculate_delay(attempt - 1);
            debug!(op_id, attempt, delay_secs = delay.as_secs(), "retrying after delay");
            sleep(delay).await;
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(op_id, attempt, "retry succeeded");
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt < config.max_retries {
                    warn!(op_id, attempt = attempt + 1, max_retries = config.max_retries, error = %e, "operation failed, will retry");
                } else {
                    warn!(op_id, attempt = attempt + 1, error = %e, "operation failed, retries exhausted");
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn calculate_delay_exponential() {
        let config = RetryConfig::new(3, 1, 60, 2.0);
        assert_eq!(config.calculate_delay(0).as_secs(), 1);
        assert_eq!(config.calculate_delay(1).as_secs(), 2);
        assert_eq!(config.calculate_delay(2).as_secs(), 4);
    }

    #[test]
    fn calculate_delay_capped() {
        let config = RetryConfig::new(10, 10, 30, 2.0);
        assert_eq!(config.calculate_delay(2).as_secs(), 30);
    }

    #[tokio::test]
    async fn with_retry_succeeds_after_failures() {
        let config = RetryConfig::new(3, 0, 60, 2.0);
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result = with_retry(&config, "test-op", || {
            let attempts = attempts_clone.clone();
            async move {
                let count = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if count < 3 {
                    Err("temporary failure".to_string())
                } else {
                    Ok::<i32, String>(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_retry_exhausts_retries() {
        let config = RetryConfig::new(2, 0, 60, 2.0);
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result = with_retry(&config, "test-op", || {
            let attempts = attempts_clone.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<i32, String>("permanent failure".to_string())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
