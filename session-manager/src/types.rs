//! `SessionInfo` and the health/audit shapes the orchestrator core returns
//! (spec §4.8, §3).

use chrono::{DateTime, Utc};
use container_runtime::{ContainerAuditReport, ContainerStats, RuntimeStatus};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: u64,
    pub repository_id: u64,
    pub branch: String,
    pub url: String,
    pub status: RuntimeStatus,
    pub created_at: DateTime<Utc>,
}

/// `performHealthChecks` per-container result (spec §4.8).
#[derive(Debug, Clone)]
pub struct SessionHealth {
    pub session_id: String,
    pub healthy: bool,
    pub resource_usage: Option<ContainerStats>,
    pub security_compliant: Option<bool>,
    pub security_violations: Vec<String>,
}

/// `performSecurityAudit` per-container result (spec §4.8).
#[derive(Debug, Clone)]
pub struct SessionAuditEntry {
    pub session_id: String,
    pub user_id: u64,
    pub repository_id: u64,
    pub branch: String,
    pub audit: ContainerAuditReport,
}

/// Outcome of a bulk operation (`cleanupInactiveSessions`, `shutdown`) that
/// may partially fail without aborting the whole pass.
#[derive(Debug, Clone, Default)]
pub struct BulkOutcome {
    pub succeeded: Vec<String>,
    pub failed: HashMap<String, String>,
}

impl BulkOutcome {
    pub fn record_success(&mut self, session_id: impl Into<String>) {
        self.succeeded.push(session_id.into());
    }

    pub fn record_failure(&mut self, session_id: impl Into<String>, error: impl std::fmt::Display) {
        self.failed.insert(session_id.into(), error.to_string());
    }
}
