//! Container-runtime capability derivation (spec §4.4 "Capability derivation
//! for the container runtime"). Pure translation from a `SecurityProfile`
//! into the concrete options `container-runtime` (C6) applies to a container
//! at creation time. Kept here, not in `container-runtime`, because the
//! values are dictated by security policy, not by the runtime adapter.

use crate::types::SecurityProfile;

#[derive(Debug, Clone)]
pub struct TmpfsMount {
    pub target: String,
    pub size_bytes: u64,
    pub options: &'static str,
}

#[derive(Debug, Clone)]
pub struct Ulimit {
    pub name: &'static str,
    pub soft: i64,
    pub hard: i64,
}

#[derive(Debug, Clone)]
pub struct ContainerSecurityOptions {
    /// `--security-opt` entries, e.g. `no-new-privileges:true`.
    pub security_opt: Vec<String>,
    pub cap_drop: Vec<String>,
    pub cap_add: Vec<String>,
    pub read_only_rootfs: bool,
    pub tmpfs: Vec<TmpfsMount>,
    pub ulimits: Vec<Ulimit>,
    pub dns: Vec<String>,
    pub isolated_network: bool,
    pub run_as_non_root: bool,
}

/// Derive the container-facing security options from a profile. Values are
/// fixed by spec §4.4 except `ulimits.fsize`, which tracks the profile's
/// `maxFileSize`.
pub fn derive_container_security(profile: &SecurityProfile) -> ContainerSecurityOptions {
    ContainerSecurityOptions {
        security_opt: vec![
            "no-new-privileges:true".to_string(),
            "apparmor:docker-default".to_string(),
            "seccomp:default".to_string(),
        ],
        cap_drop: vec!["ALL".to_string()],
        cap_add: vec![],
        read_only_rootfs: true,
        tmpfs: vec![
            TmpfsMount {
                target: "/tmp".to_string(),
                size_bytes: 100 * 1024 * 1024,
                options: "rw,noexec,nosuid",
            },
            TmpfsMount {
                target: "/var/tmp".to_string(),
                size_bytes: 50 * 1024 * 1024,
                options: "rw,noexec,nosuid",
            },
            TmpfsMount {
                target: "/home/coder/.cache".to_string(),
                size_bytes: 200 * 1024 * 1024,
                options: "rw,noexec,nosuid",
            },
        ],
        ulimits: vec![
            Ulimit { name: "nofile", soft: 1024, hard: 2048 },
            Ulimit { name: "nproc", soft: 512, hard: 1024 },
            Ulimit {
                name: "fsize",
                soft: profile.filesystem.max_file_size_bytes as i64,
                hard: profile.filesystem.max_file_size_bytes as i64,
            },
        ],
        dns: vec!["8.8.8.8".to_string(), "8.8.4.4".to_string()],
        isolated_network: true,
        run_as_non_root: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{derive_profile, Permissions, ResourceDefaults};
    use std::collections::HashSet;

    #[test]
    fn derives_fixed_security_baseline() {
        let permissions = Permissions {
            can_create_branches: true,
            branch_limit: 5,
            allowed_base_branches: HashSet::new(),
            allow_terminal_access: true,
        };
        let profile = derive_profile(1, &permissions, 1, &ResourceDefaults::default());
        let opts = derive_container_security(&profile);

        assert_eq!(opts.cap_drop, vec!["ALL".to_string()]);
        assert!(opts.cap_add.is_empty());
        assert!(opts.read_only_rootfs);
        assert!(opts.isolated_network);
        assert_eq!(opts.tmpfs.len(), 3);
        assert_eq!(opts.ulimits.iter().find(|u| u.name == "fsize").unwrap().soft, 100 * 1024 * 1024);
    }
}
