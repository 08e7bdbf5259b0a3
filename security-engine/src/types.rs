use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Derived, never-persisted security profile for one session (spec §3, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityProfile {
    pub user_id: u64,
    pub repository_id: u64,
    pub network: NetworkRestrictions,
    pub filesystem: FileSystemRestrictions,
    pub resource_limits: ResourceLimits,
    pub terminal: TerminalRestrictions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRestrictions {
    pub allowed_hosts: HashSet<String>,
    pub blocked_ports: HashSet<u16>,
    pub suspicious_ports: HashSet<u16>,
    pub enable_internet: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSystemRestrictions {
    pub allowed_paths: Vec<String>,
    pub read_only_paths: Vec<String>,
    pub max_file_size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub memory: String,
    pub cpu: f64,
    pub disk_quota: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalRestrictions {
    pub enabled: bool,
    pub allowed_commands: Vec<String>,
    pub blocked_commands: Vec<String>,
    pub shell_timeout_secs: u64,
}

/// Severity levels for violations (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationType {
    TerminalCommandDenied,
    TerminalAccessDenied,
    MountDenied,
    FileAccessDenied,
    NetworkAccessDenied,
    ResourceLimitExceeded,
    EscapeAttemptDetected,
}

/// An append-only violation record (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityViolation {
    pub id: u64,
    pub violation_type: ViolationType,
    pub user_id: u64,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub resource: String,
    pub blocked: bool,
    pub severity: Severity,
    pub metadata: HashMap<String, String>,
}
