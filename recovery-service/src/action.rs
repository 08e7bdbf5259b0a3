//! `RecoveryAction` (spec §4.9, §5): the state machine tracked per failure.

use crate::rules::RecoveryStrategy;
use chrono::{DateTime, Utc};
use error_kernel::ErrorKind;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryTarget {
    Container(String),
    Session { user_id: u64, repository_id: u64, branch: String },
}

#[derive(Debug, Clone)]
pub struct RecoveryAction {
    pub id: Uuid,
    pub target: RecoveryTarget,
    pub error_kind: ErrorKind,
    pub strategy: RecoveryStrategy,
    pub max_attempts: u32,
    pub attempts: u32,
    pub status: RecoveryStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RecoveryAction {
    pub fn pending(target: RecoveryTarget, error_kind: ErrorKind, strategy: RecoveryStrategy, max_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            error_kind,
            strategy,
            max_attempts,
            attempts: 0,
            status: RecoveryStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}
