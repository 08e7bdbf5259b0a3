//! Error & retry kernel (C1).
//!
//! Defines the closed error taxonomy the orchestrator core uses to talk
//! about failures, plus the retry and circuit-breaker primitives other
//! crates build their resilience on.

pub mod circuit_breaker;
pub mod error;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerOpenError, CircuitState};
pub use error::{ErrorKind, OrchestratorError};
pub use retry::{retry, RetryConfig, RetryError};
