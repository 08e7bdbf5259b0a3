//! Retry with exponential backoff (spec §4.1).
//!
//! Retries an operation only when the error's `ErrorKind` classifies as
//! retryable; non-retryable errors surface after a single attempt.

use crate::error::OrchestratorError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Retry configuration: `delay = min(base * mult^(attempt-1), max)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    fn delay_for(&self, attempt: u32) -> u64 {
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32 - 1);
        let capped = raw.min(self.max_delay_ms as f64) as u64;
        if self.jitter_factor <= 0.0 {
            return capped;
        }
        let jitter_range = (capped as f64 * self.jitter_factor) as u64;
        if jitter_range == 0 {
            return capped;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_range);
        capped.saturating_sub(jitter)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("operation failed after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        last: OrchestratorError,
    },
    #[error("non-retryable error on first attempt: {0}")]
    NotRetryable(OrchestratorError),
}

impl RetryError {
    pub fn into_inner(self) -> OrchestratorError {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::NotRetryable(err) => err,
        }
    }
}

/// Execute `operation` up to `config.max_attempts` times, retrying only
/// while the returned error classifies as retryable.
pub async fn retry<F, Fut, T>(config: &RetryConfig, mut operation: F) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, OrchestratorError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if !err.is_retryable() {
                    warn!(kind = %err.kind, "error is not retryable, failing fast");
                    return Err(RetryError::NotRetryable(err));
                }
                if attempt >= config.max_attempts {
                    error!(attempt, kind = %err.kind, "retry attempts exhausted");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                let delay_ms = config.delay_for(attempt);
                warn!(attempt, delay_ms, kind = %err.kind, "retrying after transient error");
                sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_without_retry() {
        let config = RetryConfig::default();
        let result = retry(&config, || async { Ok::<_, OrchestratorError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let config = RetryConfig {
            initial_delay_ms: 1,
            ..Default::default()
        };
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts2 = attempts.clone();
        let result = retry(&config, move || {
            let attempts = attempts2.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(OrchestratorError::new(ErrorKind::NetworkError, "blip"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_on_first_attempt() {
        let config = RetryConfig::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts2 = attempts.clone();
        let result = retry(&config, move || {
            let attempts = attempts2.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(OrchestratorError::new(ErrorKind::ValidationFailed, "bad input"))
            }
        })
        .await;
        assert!(matches!(result, Err(RetryError::NotRetryable(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let config = RetryConfig {
            max_attempts: 2,
            initial_delay_ms: 1,
            ..Default::default()
        };
        let result = retry(&config, || async {
            Err::<(), _>(OrchestratorError::new(ErrorKind::TimeoutError, "slow"))
        })
        .await;
        match result {
            Err(RetryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[test]
    fn delay_grows_exponentially_without_jitter() {
        let config = RetryConfig {
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
            ..Default::default()
        };
        assert_eq!(config.delay_for(1), 100);
        assert_eq!(config.delay_for(2), 200);
        assert_eq!(config.delay_for(3), 400);
        assert_eq!(config.delay_for(5), 1_000); // capped
    }
}
