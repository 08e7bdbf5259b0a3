//! The append-only violation log and escape-attempt scanner (spec §4.4).
//!
//! The log uses a monotonic per-process counter for violation ids (spec §5:
//! "Violation records use a monotonic append with unique ids") and is kept
//! behind a single lock; pruning happens under that same write lock.

use crate::types::{Severity, SecurityViolation, ViolationType};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{error, warn};

/// Tokens that, if seen in a session's recorded activity, indicate an
/// attempted container-escape (spec §4.4 "Escape detection").
const ESCAPE_TOKENS: &[&str] = &[
    "proc/self/root",
    "docker.sock",
    "runc",
    "cgroup",
    "namespace",
    "capabilities",
    "seccomp",
    "apparmor",
    "selinux",
];

/// Fired when a user's violation count crosses `max_violations_per_user`.
/// The core only observes this; enforcement (e.g. suspending the user) is
/// an external collaborator's responsibility (spec §4.4).
#[derive(Debug, Clone)]
pub struct EscalationEvent {
    pub user_id: u64,
    pub violation_count: u64,
}

pub struct SecurityAuditor {
    violations: RwLock<Vec<SecurityViolation>>,
    next_id: RwLock<u64>,
    per_user_counts: RwLock<HashMap<u64, u64>>,
    max_violations_per_user: u64,
}

impl SecurityAuditor {
    pub fn new(max_violations_per_user: u64) -> Self {
        Self {
            violations: RwLock::new(Vec::new()),
            next_id: RwLock::new(1),
            per_user_counts: RwLock::new(HashMap::new()),
            max_violations_per_user,
        }
    }

    /// Append a violation, assigning it a unique monotonic id. Returns the
    /// recorded violation and, if this crossed the per-user threshold, an
    /// escalation event for the caller to surface.
    pub fn record(
        &self,
        violation_type: ViolationType,
        user_id: u64,
        session_id: Option<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        blocked: bool,
        severity: Severity,
        metadata: HashMap<String, String>,
    ) -> (SecurityViolation, Option<EscalationEvent>) {
        let id = {
            let mut next_id = self.next_id.write();
            let id = *next_id;
            *next_id += 1;
            id
        };

        let violation = SecurityViolation {
            id,
            violation_type,
            user_id,
            session_id,
            timestamp: Utc::now(),
            action: action.into(),
            resource: resource.into(),
            blocked,
            severity,
            metadata,
        };

        if severity >= Severity::High {
            warn!(
                user_id,
                violation_type = ?violation.violation_type,
                blocked,
                "security violation recorded"
            );
        }

        self.violations.write().push(violation.clone());

        let count = {
            let mut counts = self.per_user_counts.write();
            let entry = counts.entry(user_id).or_insert(0);
            *entry += 1;
            *entry
        };

        let escalation = (count >= self.max_violations_per_user).then(|| {
            error!(user_id, count, "user crossed max violations threshold");
            EscalationEvent { user_id, violation_count: count }
        });

        (violation, escalation)
    }

    /// Scan a session's recorded activity strings for escape-attempt
    /// tokens. A match is always `Critical` and the caller is expected to
    /// terminate the session (spec §4.4: "critical + terminate signal").
    pub fn scan_for_escape_attempt(
        &self,
        user_id: u64,
        session_id: Option<String>,
        activity_log: &[String],
    ) -> Option<SecurityViolation> {
        for entry in activity_log {
            let lower = entry.to_lowercase();
            if let Some(token) = ESCAPE_TOKENS.iter().find(|t| lower.contains(*t)) {
                let (violation, _) = self.record(
                    ViolationType::EscapeAttemptDetected,
                    user_id,
                    session_id,
                    "escape-attempt-scan",
                    entry.clone(),
                    true,
                    Severity::Critical,
                    HashMap::from([("matched_token".to_string(), token.to_string())]),
                );
                return Some(violation);
            }
        }
        None
    }

    pub fn violations(&self) -> Vec<SecurityViolation> {
        self.violations.read().clone()
    }

    pub fn violations_for_user(&self, user_id: u64) -> Vec<SecurityViolation> {
        self.violations.read().iter().filter(|v| v.user_id == user_id).cloned().collect()
    }

    pub fn violation_count_for_user(&self, user_id: u64) -> u64 {
        *self.per_user_counts.read().get(&user_id).unwrap_or(&0)
    }

    /// Drop violations older than `days` days, returning the number removed
    /// (spec §4.4 `clearOldViolations`).
    pub fn clear_old_violations(&self, days: i64) -> usize {
        let cutoff: DateTime<Utc> = Utc::now() - Duration::days(days);
        let mut violations = self.violations.write();
        let before = violations.len();
        violations.retain(|v| v.timestamp >= cutoff);
        before - violations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigns_unique_monotonic_ids() {
        let auditor = SecurityAuditor::new(1000);
        let (v1, _) = auditor.record(
            ViolationType::TerminalCommandDenied,
            1,
            None,
            "exec",
            "rm -rf /",
            true,
            Severity::Critical,
            HashMap::new(),
        );
        let (v2, _) = auditor.record(
            ViolationType::TerminalCommandDenied,
            1,
            None,
            "exec",
            "docker ps",
            true,
            Severity::High,
            HashMap::new(),
        );
        assert_eq!(v2.id, v1.id + 1);
    }

    #[test]
    fn escalates_when_crossing_max_violations() {
        let auditor = SecurityAuditor::new(2);
        let (_, first) = auditor.record(
            ViolationType::TerminalCommandDenied, 1, None, "a", "b", true, Severity::Low, HashMap::new(),
        );
        assert!(first.is_none());
        let (_, second) = auditor.record(
            ViolationType::TerminalCommandDenied, 1, None, "a", "b", true, Severity::Low, HashMap::new(),
        );
        assert!(second.is_some());
        assert_eq!(second.unwrap().violation_count, 2);
    }

    #[test]
    fn clear_old_violations_retains_only_recent_entries() {
        let auditor = SecurityAuditor::new(1000);
        auditor.record(
            ViolationType::TerminalCommandDenied, 1, None, "a", "b", true, Severity::Low, HashMap::new(),
        );
        // Everything was just recorded, so a 0-day cutoff drops nothing yet
        // and a negative window (simulated via clearing after the fact)
        // would drop everything; exercise the "retains recent" path here.
        let removed = auditor.clear_old_violations(365);
        assert_eq!(removed, 0);
        assert_eq!(auditor.violations().len(), 1);
    }

    #[test]
    fn escape_tokens_are_detected_and_recorded_critical() {
        let auditor = SecurityAuditor::new(1000);
        let activity = vec!["cat /proc/self/root/etc/passwd".to_string()];
        let violation = auditor.scan_for_escape_attempt(1, Some("s1".to_string()), &activity);
        assert!(violation.is_some());
        assert_eq!(violation.unwrap().severity, Severity::Critical);
    }

    #[test]
    fn clean_activity_log_produces_no_violation() {
        let auditor = SecurityAuditor::new(1000);
        let activity = vec!["git status".to_string(), "npm install".to_string()];
        assert!(auditor.scan_for_escape_attempt(1, None, &activity).is_none());
    }
}
