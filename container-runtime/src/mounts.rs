//! Mount translation (spec §4.6 step 5): worktree + extensions mounts,
//! each run through the security engine's mount validator before being
//! handed to the runtime.

use bollard::models::{Mount, MountTypeEnum};
use error_kernel::{ErrorKind, OrchestratorError};
use security_engine::{validate_mount, SecurityProfile};

/// One mount request before validation.
#[derive(Debug, Clone)]
pub struct MountRequest {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

/// Build the container's bind mounts (spec §4.6 step 5): the worktree at
/// `/home/coder/workspace` (rw) and the shared extensions directory at
/// `/home/coder/.local/share/code-server/extensions` (ro), each validated
/// against the profile's filesystem restrictions. A read-only-path match
/// forces `read_only` even if the request asked for `rw`.
pub fn build_workspace_mounts(
    worktree_path: &str,
    extensions_path: &str,
    profile: &SecurityProfile,
) -> Result<Vec<Mount>, OrchestratorError> {
    let requests = [
        MountRequest {
            source: worktree_path.to_string(),
            target: "/home/coder/workspace".to_string(),
            read_only: false,
        },
        MountRequest {
            source: extensions_path.to_string(),
            target: "/home/coder/.local/share/code-server/extensions".to_string(),
            read_only: true,
        },
    ];

    requests.into_iter().map(|req| validate_and_build(&req, profile)).collect()
}

fn validate_and_build(request: &MountRequest, profile: &SecurityProfile) -> Result<Mount, OrchestratorError> {
    let validation = validate_mount(profile, &request.target);
    if !validation.allowed {
        return Err(OrchestratorError::new(
            ErrorKind::SecurityViolation,
            validation.reason.unwrap_or_else(|| format!("mount '{}' denied", request.target)),
        ));
    }

    Ok(Mount {
        source: Some(request.source.clone()),
        target: Some(request.target.clone()),
        typ: Some(MountTypeEnum::BIND),
        read_only: Some(request.read_only || validation.force_read_only),
        ..Default::default()
    })
}
