//! The closed error taxonomy (spec §4.1) and its user-facing mapping (spec §7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The closed set of error kinds the orchestrator core can raise.
///
/// This set is intentionally closed: every error that crosses a component
/// boundary gets wrapped into one of these variants, with the original
/// cause preserved in `metadata`. Adding a new external failure mode means
/// adding a variant here, not inventing an ad-hoc string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    ValidationFailed,
    ContainerCreationFailed,
    ContainerStartFailed,
    ContainerStopFailed,
    DockerConnectionFailed,
    ContainerLimitExceeded,
    GitCloneFailed,
    GitWorktreeCreationFailed,
    GitOperationFailed,
    InvalidGitUrl,
    InvalidBranchName,
    ResourceLimitExceeded,
    SystemOverloaded,
    SecurityViolation,
    NetworkError,
    TimeoutError,
    DatabaseError,
    InternalError,
}

impl ErrorKind {
    /// Errors the retry kernel considers transient and worth retrying.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkError
                | ErrorKind::TimeoutError
                | ErrorKind::DockerConnectionFailed
                | ErrorKind::SystemOverloaded
                | ErrorKind::DatabaseError
        )
    }

    /// Operational errors are expected and safe to surface to a caller.
    /// Anything else is treated as non-operational: always logged at
    /// critical and converted to `InternalError` before it reaches a caller.
    pub fn is_operational(self) -> bool {
        !matches!(self, ErrorKind::InternalError)
    }

    /// A suggested HTTP-style status hint for interfaces that need one.
    /// The core itself is transport-agnostic; this is metadata only.
    pub fn status_hint(self) -> u16 {
        match self {
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden | ErrorKind::SecurityViolation => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::ValidationFailed
            | ErrorKind::InvalidGitUrl
            | ErrorKind::InvalidBranchName => 422,
            ErrorKind::ContainerLimitExceeded | ErrorKind::ResourceLimitExceeded => 429,
            ErrorKind::TimeoutError => 504,
            ErrorKind::SystemOverloaded => 503,
            ErrorKind::ContainerCreationFailed
            | ErrorKind::ContainerStartFailed
            | ErrorKind::ContainerStopFailed
            | ErrorKind::DockerConnectionFailed
            | ErrorKind::GitCloneFailed
            | ErrorKind::GitWorktreeCreationFailed
            | ErrorKind::GitOperationFailed
            | ErrorKind::NetworkError
            | ErrorKind::DatabaseError
            | ErrorKind::InternalError => 500,
        }
    }

    /// The user-visible message mapping from spec §7.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "Please log in",
            ErrorKind::Forbidden | ErrorKind::SecurityViolation => "Action not allowed",
            ErrorKind::NotFound => "Resource not found",
            ErrorKind::ContainerLimitExceeded => "Maximum environments reached",
            ErrorKind::GitCloneFailed => "Verify repository URL and access",
            ErrorKind::InvalidBranchName => "Use allowed characters",
            ErrorKind::ResourceLimitExceeded => "Try again later",
            ErrorKind::TimeoutError => "Operation timed out",
            _ => "Unexpected error, try again",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A taxonomy error carrying context for logging and recovery.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct OrchestratorError {
    pub kind: ErrorKind,
    pub message: String,
    pub is_operational: bool,
    pub metadata: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl OrchestratorError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            is_operational: kind.is_operational(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Wrap an arbitrary external error (runtime SDK, VCS library, HTTP
    /// client, …) into the taxonomy, preserving its message as the cause.
    pub fn wrap(kind: ErrorKind, cause: impl fmt::Display) -> Self {
        Self::new(kind, cause.to_string()).with_metadata("cause", cause.to_string())
    }

    pub fn status_hint(&self) -> u16 {
        self.kind.status_hint()
    }

    pub fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds_match_spec() {
        assert!(ErrorKind::NetworkError.is_retryable());
        assert!(ErrorKind::TimeoutError.is_retryable());
        assert!(ErrorKind::DockerConnectionFailed.is_retryable());
        assert!(ErrorKind::SystemOverloaded.is_retryable());
        assert!(ErrorKind::DatabaseError.is_retryable());
        assert!(!ErrorKind::ValidationFailed.is_retryable());
        assert!(!ErrorKind::Unauthorized.is_retryable());
    }

    #[test]
    fn internal_error_is_the_only_non_operational_kind() {
        assert!(!ErrorKind::InternalError.is_operational());
        assert!(ErrorKind::ContainerLimitExceeded.is_operational());
        assert!(ErrorKind::SecurityViolation.is_operational());
    }

    #[test]
    fn user_messages_follow_the_mapping_table() {
        assert_eq!(ErrorKind::Unauthorized.user_message(), "Please log in");
        assert_eq!(
            ErrorKind::ContainerLimitExceeded.user_message(),
            "Maximum environments reached"
        );
        assert_eq!(ErrorKind::InternalError.user_message(), "Unexpected error, try again");
    }

    #[test]
    fn wrap_preserves_cause_in_metadata() {
        let err = OrchestratorError::wrap(ErrorKind::DockerConnectionFailed, "connection refused");
        assert_eq!(err.metadata.get("cause").unwrap(), "connection refused");
        assert!(err.is_retryable());
    }
}
