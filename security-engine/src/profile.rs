//! Deterministic `SecurityProfile` derivation (spec §3, §4.4).
//!
//! `derive_profile` is a pure function of `(userId, permissions, repoId)`:
//! equal inputs always produce an equal profile. Nothing here is persisted —
//! callers recompute on demand (spec §9's mocked-mounts note applies to
//! monitoring, not to this function itself).

use crate::types::{
    FileSystemRestrictions, NetworkRestrictions, ResourceLimits, SecurityProfile,
    TerminalRestrictions,
};
use std::collections::HashSet;

/// The subset of `Permission` (spec §3) the profile derivation reads.
#[derive(Debug, Clone)]
pub struct Permissions {
    pub can_create_branches: bool,
    pub branch_limit: u32,
    pub allowed_base_branches: HashSet<String>,
    pub allow_terminal_access: bool,
}

/// Resource ceilings an operator can configure (spec §6 `DEFAULT_MEMORY_LIMIT`
/// / `DEFAULT_CPU_LIMIT` / `MAX_DISK_PER_CONTAINER`). Defaults match §4.4.
#[derive(Debug, Clone)]
pub struct ResourceDefaults {
    pub memory: String,
    pub cpu: f64,
    pub disk_quota: String,
}

impl Default for ResourceDefaults {
    fn default() -> Self {
        Self {
            memory: "2g".to_string(),
            cpu: 1.0,
            disk_quota: "5g".to_string(),
        }
    }
}

/// Commands always blocked regardless of permission, per §4.4.
pub const ALWAYS_BLOCKED_COMMANDS: &[&str] = &[
    "docker",
    "kubectl",
    "systemctl",
    "service",
    "mount",
    "umount",
    "fdisk",
    "mkfs",
    "iptables",
    "netstat",
    "ss",
    "lsof",
    "ps aux",
    "kill -9",
    "killall",
    "chmod 777",
    "chown root",
    "sudo su",
    "su -",
    "rm -rf /",
    "dd if=",
];

const DEFAULT_SHELL_TIMEOUT_SECS: u64 = 3600;

fn default_allowed_hosts() -> HashSet<String> {
    ["127.0.0.1", "localhost", "::1"].iter().map(|s| s.to_string()).collect()
}

fn default_blocked_ports() -> HashSet<u16> {
    [22, 23, 25, 53, 80, 443, 993, 995].into_iter().collect()
}

fn default_suspicious_ports() -> HashSet<u16> {
    [22, 23, 25, 53, 135, 139, 445, 993, 995, 1433, 3306, 3389, 5432, 6379, 27017]
        .into_iter()
        .collect()
}

/// Derive the per-session security profile. `repository_id` is folded in
/// only for traceability (it is not used to branch any restriction today)
/// since spec §3 defines the profile as a function of all three inputs.
pub fn derive_profile(
    user_id: u64,
    permissions: &Permissions,
    repository_id: u64,
    resource_defaults: &ResourceDefaults,
) -> SecurityProfile {
    let terminal = TerminalRestrictions {
        enabled: permissions.allow_terminal_access,
        allowed_commands: if permissions.allow_terminal_access {
            Vec::new()
        } else {
            Vec::new()
        },
        blocked_commands: ALWAYS_BLOCKED_COMMANDS.iter().map(|s| s.to_string()).collect(),
        shell_timeout_secs: DEFAULT_SHELL_TIMEOUT_SECS,
    };

    SecurityProfile {
        user_id,
        repository_id,
        network: NetworkRestrictions {
            allowed_hosts: default_allowed_hosts(),
            blocked_ports: default_blocked_ports(),
            suspicious_ports: default_suspicious_ports(),
            enable_internet: false,
        },
        filesystem: FileSystemRestrictions {
            allowed_paths: vec![
                "/home/coder/workspace".to_string(),
                "/tmp".to_string(),
                "/home/coder/.local/share/code-server".to_string(),
            ],
            read_only_paths: vec![
                "/etc".to_string(),
                "/usr".to_string(),
                "/bin".to_string(),
                "/sbin".to_string(),
                "/lib".to_string(),
                "/lib64".to_string(),
            ],
            max_file_size_bytes: 100 * 1024 * 1024,
        },
        resource_limits: ResourceLimits {
            memory: resource_defaults.memory.clone(),
            cpu: resource_defaults.cpu,
            disk_quota: resource_defaults.disk_quota.clone(),
        },
        terminal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permissions(allow_terminal: bool) -> Permissions {
        Permissions {
            can_create_branches: true,
            branch_limit: 5,
            allowed_base_branches: ["main".to_string()].into_iter().collect(),
            allow_terminal_access: allow_terminal,
        }
    }

    #[test]
    fn is_a_pure_function_of_its_inputs() {
        let defaults = ResourceDefaults::default();
        let a = derive_profile(1, &permissions(true), 2, &defaults);
        let b = derive_profile(1, &permissions(true), 2, &defaults);
        assert_eq!(a.network.enable_internet, b.network.enable_internet);
        assert_eq!(a.terminal.enabled, b.terminal.enabled);
        assert_eq!(a.filesystem.allowed_paths, b.filesystem.allowed_paths);
    }

    #[test]
    fn terminal_disabled_permission_disables_profile_terminal() {
        let defaults = ResourceDefaults::default();
        let profile = derive_profile(1, &permissions(false), 2, &defaults);
        assert!(!profile.terminal.enabled);
        assert!(profile.terminal.allowed_commands.is_empty());
    }

    #[test]
    fn always_blocked_commands_are_present_regardless_of_terminal_access() {
        let defaults = ResourceDefaults::default();
        for allow in [true, false] {
            let profile = derive_profile(1, &permissions(allow), 2, &defaults);
            assert!(profile.terminal.blocked_commands.contains(&"docker".to_string()));
            assert!(profile.terminal.blocked_commands.contains(&"rm -rf /".to_string()));
        }
    }

    #[test]
    fn defaults_match_spec_4_4() {
        let defaults = ResourceDefaults::default();
        let profile = derive_profile(1, &permissions(true), 1, &defaults);
        assert!(profile.network.allowed_hosts.contains("127.0.0.1"));
        assert!(profile.network.blocked_ports.contains(&22));
        assert_eq!(profile.filesystem.max_file_size_bytes, 100 * 1024 * 1024);
        assert_eq!(profile.resource_limits.memory, "2g");
    }
}
