//! The priority-sorted recovery rule table (spec §4.9).

use error_kernel::ErrorKind;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    Restart,
    Recreate,
    Cleanup,
    Failover,
    Manual,
}

#[derive(Debug, Clone)]
pub struct RecoveryRule {
    pub priority: u8,
    pub condition: fn(ErrorKind) -> bool,
    pub strategy: RecoveryStrategy,
    pub max_attempts: u32,
    pub delay: Duration,
    pub enabled: bool,
}

/// The default table from spec §4.9, already sorted by descending priority.
pub fn default_rules() -> Vec<RecoveryRule> {
    vec![
        RecoveryRule {
            priority: 10,
            condition: |k| k == ErrorKind::SecurityViolation,
            strategy: RecoveryStrategy::Manual,
            max_attempts: 1,
            delay: Duration::from_millis(0),
            enabled: true,
        },
        RecoveryRule {
            priority: 9,
            condition: |k| k == ErrorKind::DockerConnectionFailed,
            strategy: RecoveryStrategy::Cleanup,
            max_attempts: 1,
            delay: Duration::from_millis(1000),
            enabled: true,
        },
        RecoveryRule {
            priority: 8,
            condition: |k| k == ErrorKind::ContainerCreationFailed,
            strategy: RecoveryStrategy::Recreate,
            max_attempts: 3,
            delay: Duration::from_millis(5000),
            enabled: true,
        },
        RecoveryRule {
            priority: 8,
            condition: |k| k == ErrorKind::SystemOverloaded,
            strategy: RecoveryStrategy::Cleanup,
            max_attempts: 1,
            delay: Duration::from_millis(5000),
            enabled: true,
        },
        RecoveryRule {
            priority: 7,
            condition: |k| k == ErrorKind::ContainerStartFailed,
            strategy: RecoveryStrategy::Restart,
            max_attempts: 2,
            delay: Duration::from_millis(3000),
            enabled: true,
        },
        RecoveryRule {
            priority: 6,
            condition: |k| k == ErrorKind::ResourceLimitExceeded,
            strategy: RecoveryStrategy::Cleanup,
            max_attempts: 1,
            delay: Duration::from_millis(2000),
            enabled: true,
        },
        RecoveryRule {
            priority: 5,
            condition: |k| {
                matches!(
                    k,
                    ErrorKind::GitCloneFailed
                        | ErrorKind::GitWorktreeCreationFailed
                        | ErrorKind::GitOperationFailed
                )
            },
            strategy: RecoveryStrategy::Recreate,
            max_attempts: 2,
            delay: Duration::from_millis(3000),
            enabled: true,
        },
    ]
}

/// The first enabled rule matching this error kind, in priority order
/// (spec §4.9: "pick the first enabled matching rule").
pub fn match_rule(rules: &[RecoveryRule], kind: ErrorKind) -> Option<RecoveryRule> {
    let mut sorted: Vec<&RecoveryRule> = rules.iter().filter(|r| r.enabled).collect();
    sorted.sort_by(|a, b| b.priority.cmp(&a.priority));
    sorted.into_iter().find(|r| (r.condition)(kind)).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_violation_maps_to_manual_at_top_priority() {
        let rule = match_rule(&default_rules(), ErrorKind::SecurityViolation).unwrap();
        assert_eq!(rule.priority, 10);
        assert_eq!(rule.strategy, RecoveryStrategy::Manual);
    }

    #[test]
    fn git_failures_all_map_to_recreate() {
        let rules = default_rules();
        for kind in [ErrorKind::GitCloneFailed, ErrorKind::GitWorktreeCreationFailed, ErrorKind::GitOperationFailed] {
            let rule = match_rule(&rules, kind).unwrap();
            assert_eq!(rule.strategy, RecoveryStrategy::Recreate);
            assert_eq!(rule.priority, 5);
        }
    }

    #[test]
    fn unmatched_kind_yields_no_rule() {
        assert!(match_rule(&default_rules(), ErrorKind::ValidationFailed).is_none());
    }

    #[test]
    fn disabled_rule_is_skipped() {
        let mut rules = default_rules();
        rules.iter_mut().find(|r| r.priority == 10).unwrap().enabled = false;
        assert!(match_rule(&rules, ErrorKind::SecurityViolation).is_none());
    }
}
