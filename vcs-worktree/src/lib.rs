//! VCS worktree provider (C5): bare clone, worktree add/remove, branch
//! listing/creation, and deploy-key generation over `git2` (spec §4.5).

pub mod deploy_key;
pub mod paths;
pub mod provider;
pub mod validation;

pub use deploy_key::{generate_deploy_key, DeployKeyPair};
pub use paths::{repo_path, sanitize_branch, ssh_key_path, worktree_path};
pub use provider::{ssh_command_for_key, FakeWorktreeProvider, Git2WorktreeProvider, OperationOutcome, WorktreeProvider};
pub use validation::{is_valid_branch_name, is_valid_git_url};
