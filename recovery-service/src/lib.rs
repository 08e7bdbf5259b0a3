//! Recovery service (C9, spec §4.9): a priority-sorted rule table maps
//! error kinds to strategies (restart, recreate, cleanup, failover,
//! manual), and a bounded-concurrency processor drives each opened
//! `RecoveryAction` to completion or exhaustion.

pub mod action;
pub mod rules;
pub mod service;
pub mod strategies;

pub use action::{RecoveryAction, RecoveryStatus, RecoveryTarget};
pub use rules::{default_rules, match_rule, RecoveryRule, RecoveryStrategy};
pub use service::{FailureRecorder, NoopFailureRecorder, RecoveryService, PROCESSOR_TICK};
pub use strategies::SessionRecreator;
