//! Circuit breaker pattern (spec §4.1).
//!
//! States: `Closed -> Open -> HalfOpen`. Opens after N consecutive
//! failures; after a cooldown enters half-open; one success closes it,
//! any failure in half-open reopens it.

use crate::error::{ErrorKind, OrchestratorError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn from_code(code: u8) -> Self {
        match code {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }

    fn code(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub name: String,
    pub failure_threshold: u64,
    pub success_threshold: u64,
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "unnamed".to_string(),
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("circuit breaker '{circuit_name}' is open")]
pub struct CircuitBreakerOpenError {
    pub circuit_name: String,
}

/// A single circuit breaker guarding calls to one external collaborator
/// (the container runtime, the VCS provider, the proxy registrar, …).
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: AtomicU8,
    failure_count: AtomicU64,
    success_count: AtomicU64,
    next_attempt: Arc<RwLock<Instant>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(CircuitState::Closed.code()),
            failure_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            next_attempt: Arc::new(RwLock::new(Instant::now())),
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_code(self.state.load(Ordering::Acquire))
    }

    /// Execute `operation` through the breaker. Falls back to `fallback`
    /// (if provided) when the breaker is open rather than invoking the
    /// operation at all.
    pub async fn execute<F, Fut, T>(
        &self,
        operation: F,
        fallback: Option<T>,
    ) -> Result<T, OrchestratorError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, OrchestratorError>>,
    {
        if self.state() == CircuitState::Open {
            let next_attempt = *self.next_attempt.read().await;
            if Instant::now() < next_attempt {
                if let Some(value) = fallback {
                    return Ok(value);
                }
                return Err(OrchestratorError::new(
                    ErrorKind::SystemOverloaded,
                    format!("circuit breaker '{}' is open", self.config.name),
                ));
            }
            // cooldown elapsed, probe with a half-open trial
            self.state.store(CircuitState::HalfOpen.code(), Ordering::Release);
            self.success_count.store(0, Ordering::Release);
            info!(circuit = %self.config.name, "circuit breaker entering half-open");
        }

        match operation().await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(err) => {
                self.on_failure().await;
                Err(err)
            }
        }
    }

    async fn on_success(&self) {
        self.failure_count.store(0, Ordering::Release);
        if self.state() == CircuitState::HalfOpen {
            let successes = self.success_count.fetch_add(1, Ordering::AcqRel) + 1;
            if successes >= self.config.success_threshold {
                self.state.store(CircuitState::Closed.code(), Ordering::Release);
                self.success_count.store(0, Ordering::Release);
                info!(circuit = %self.config.name, "circuit breaker closed");
            }
        }
    }

    async fn on_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        if self.state() == CircuitState::HalfOpen || failures >= self.config.failure_threshold {
            self.state.store(CircuitState::Open.code(), Ordering::Release);
            *self.next_attempt.write().await =
                Instant::now() + Duration::from_millis(self.config.reset_timeout_ms);
            self.success_count.store(0, Ordering::Release);
            warn!(circuit = %self.config.name, failures, "circuit breaker opened");
        }
    }

    pub async fn reset(&self) {
        self.state.store(CircuitState::Closed.code(), Ordering::Release);
        self.failure_count.store(0, Ordering::Release);
        self.success_count.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_failure_threshold() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        });

        for _ in 0..2 {
            let _ = cb
                .execute(
                    || async { Err::<(), _>(OrchestratorError::new(ErrorKind::NetworkError, "down")) },
                    None,
                )
                .await;
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn open_breaker_uses_fallback() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let _ = cb
            .execute(
                || async { Err::<i32, _>(OrchestratorError::new(ErrorKind::NetworkError, "down")) },
                None,
            )
            .await;
        assert_eq!(cb.state(), CircuitState::Open);

        let result = cb
            .execute(
                || async { Ok::<i32, _>(1) },
                Some(99),
            )
            .await;
        assert_eq!(result.unwrap(), 99);
    }

    #[tokio::test]
    async fn reset_closes_the_breaker() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let _ = cb
            .execute(
                || async { Err::<(), _>(OrchestratorError::new(ErrorKind::NetworkError, "down")) },
                None,
            )
            .await;
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset().await;
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
