//! A stand-in [`session_manager::PermissionsProvider`] for this binary.
//!
//! spec §1's Non-goals exclude a user/permission store: "who can create
//! branches, access levels" live in an external system this crate doesn't
//! own. Until that system is wired in, every user gets the same
//! conservative defaults (terminal enabled, branches allowed, base branch
//! `main`), matching the `derive_profile` defaults `security-engine`
//! already assumes when no caller-specific grant exists.

use async_trait::async_trait;
use error_kernel::OrchestratorError;
use security_engine::Permissions;
use session_manager::PermissionsProvider;
use std::collections::HashSet;

pub struct StaticPermissionsProvider {
    defaults: Permissions,
}

impl Default for StaticPermissionsProvider {
    fn default() -> Self {
        Self {
            defaults: Permissions {
                can_create_branches: true,
                branch_limit: 5,
                allowed_base_branches: HashSet::from(["main".to_string()]),
                allow_terminal_access: true,
            },
        }
    }
}

#[async_trait]
impl PermissionsProvider for StaticPermissionsProvider {
    async fn permissions_for(&self, _user_id: u64) -> Result<Permissions, OrchestratorError> {
        Ok(self.defaults.clone())
    }
}
