//! The bare-clone / worktree provider (spec §4.5), backed by `git2`.
//!
//! `git2` is synchronous; every call into it runs inside
//! `tokio::task::spawn_blocking` so the provider composes with the rest of
//! the orchestrator's async control flow without blocking a reactor thread.

use crate::paths::{repo_path, sanitize_branch, ssh_key_path, worktree_path};
use crate::validation::{is_valid_branch_name, is_valid_git_url};
use async_trait::async_trait;
use error_kernel::{ErrorKind, OrchestratorError};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct OperationOutcome {
    pub success: bool,
    pub message: String,
}

impl OperationOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }
}

/// The VCS worktree provider surface (spec §4.5). A trait so
/// `session-manager` can be unit-tested against an in-memory fake without a
/// real git toolchain on disk.
#[async_trait]
pub trait WorktreeProvider: Send + Sync {
    async fn clone_repository(
        &self,
        url: &str,
        repository_id: u64,
        key_path: Option<PathBuf>,
    ) -> Result<OperationOutcome, OrchestratorError>;

    async fn create_worktree(
        &self,
        repository_id: u64,
        branch: &str,
        user_id: u64,
    ) -> Result<OperationOutcome, OrchestratorError>;

    async fn remove_worktree(
        &self,
        repository_id: u64,
        branch: &str,
        user_id: u64,
    ) -> Result<OperationOutcome, OrchestratorError>;

    async fn list_branches(&self, repository_id: u64) -> Result<Vec<String>, OrchestratorError>;

    async fn create_branch(
        &self,
        repository_id: u64,
        branch: &str,
        base_branch: &str,
    ) -> Result<OperationOutcome, OrchestratorError>;

    async fn cleanup_worktrees(&self, repository_id: u64) -> Result<OperationOutcome, OrchestratorError>;

    async fn update_repository(&self, repository_id: u64) -> Result<OperationOutcome, OrchestratorError>;

    fn worktree_path(&self, repository_id: u64, user_id: u64, branch: &str) -> PathBuf;
}

/// `git2`-backed implementation rooted at `GIT_BASE_DIR` (spec §6).
pub struct Git2WorktreeProvider {
    base_dir: String,
}

impl Git2WorktreeProvider {
    pub fn new(base_dir: impl Into<String>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    fn remote_callbacks(key_path: Option<PathBuf>) -> git2::RemoteCallbacks<'static> {
        let mut callbacks = git2::RemoteCallbacks::new();
        if let Some(key_path) = key_path {
            callbacks.credentials(move |_url, username_from_url, _allowed| {
                git2::Cred::ssh_key(
                    username_from_url.unwrap_or("git"),
                    None,
                    &key_path,
                    None,
                )
            });
        }
        callbacks
    }

    fn fetch_options(key_path: Option<PathBuf>) -> git2::FetchOptions<'static> {
        let mut fetch_options = git2::FetchOptions::new();
        fetch_options.remote_callbacks(Self::remote_callbacks(key_path));
        fetch_options
    }
}

#[async_trait]
impl WorktreeProvider for Git2WorktreeProvider {
    async fn clone_repository(
        &self,
        url: &str,
        repository_id: u64,
        key_path: Option<PathBuf>,
    ) -> Result<OperationOutcome, OrchestratorError> {
        if !is_valid_git_url(url) {
            return Err(OrchestratorError::new(
                ErrorKind::InvalidGitUrl,
                format!("'{url}' is not a valid ssh:// or https:// git URL"),
            ));
        }

        let target = repo_path(&self.base_dir, repository_id);
        if target.exists() {
            return Ok(OperationOutcome::ok("repository already cloned"));
        }

        let url = url.to_string();
        tokio::task::spawn_blocking(move || -> Result<OperationOutcome, OrchestratorError> {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| OrchestratorError::wrap(ErrorKind::GitCloneFailed, e))?;
            }
            let mut builder = git2::build::RepoBuilder::new();
            builder.bare(true);
            builder.fetch_options(Git2WorktreeProvider::fetch_options(key_path));
            builder
                .clone(&url, &target)
                .map_err(|e| OrchestratorError::wrap(ErrorKind::GitCloneFailed, e))?;
            info!(repository_id, %url, "cloned bare repository");
            Ok(OperationOutcome::ok("cloned"))
        })
        .await
        .map_err(|e| OrchestratorError::wrap(ErrorKind::GitCloneFailed, e))?
    }

    async fn create_worktree(
        &self,
        repository_id: u64,
        branch: &str,
        user_id: u64,
    ) -> Result<OperationOutcome, OrchestratorError> {
        if !is_valid_branch_name(branch) {
            return Err(OrchestratorError::new(
                ErrorKind::InvalidBranchName,
                format!("'{branch}' is not a valid branch name"),
            ));
        }

        let repo_dir = repo_path(&self.base_dir, repository_id);
        let wt_path = worktree_path(&self.base_dir, repository_id, user_id, branch);
        if wt_path.exists() {
            return Ok(OperationOutcome::ok("worktree already exists"));
        }

        let branch = branch.to_string();
        let sanitized = sanitize_branch(&branch);
        tokio::task::spawn_blocking(move || -> Result<OperationOutcome, OrchestratorError> {
            let repo = git2::Repository::open_bare(&repo_dir)
                .map_err(|e| OrchestratorError::wrap(ErrorKind::GitWorktreeCreationFailed, e))?;

            let mut remote = repo
                .find_remote("origin")
                .map_err(|e| OrchestratorError::wrap(ErrorKind::GitWorktreeCreationFailed, e))?;
            remote
                .fetch(&[&branch], None, None)
                .map_err(|e| OrchestratorError::wrap(ErrorKind::GitWorktreeCreationFailed, e))?;

            let origin_ref = format!("refs/remotes/origin/{branch}");
            let reference = repo
                .find_reference(&origin_ref)
                .map_err(|e| OrchestratorError::wrap(ErrorKind::GitWorktreeCreationFailed, e))?;
            let commit = reference
                .peel_to_commit()
                .map_err(|e| OrchestratorError::wrap(ErrorKind::GitWorktreeCreationFailed, e))?;

            if let Some(parent) = wt_path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| OrchestratorError::wrap(ErrorKind::GitWorktreeCreationFailed, e))?;
            }

            let mut opts = git2::WorktreeAddOptions::new();
            opts.reference(Some(&reference));
            repo.worktree(&sanitized, &wt_path, Some(&opts))
                .map_err(|e| OrchestratorError::wrap(ErrorKind::GitWorktreeCreationFailed, e))?;

            info!(repository_id, user_id, %branch, commit = %commit.id(), "created worktree");
            Ok(OperationOutcome::ok("worktree created"))
        })
        .await
        .map_err(|e| OrchestratorError::wrap(ErrorKind::GitWorktreeCreationFailed, e))?
    }

    async fn remove_worktree(
        &self,
        repository_id: u64,
        branch: &str,
        user_id: u64,
    ) -> Result<OperationOutcome, OrchestratorError> {
        let repo_dir = repo_path(&self.base_dir, repository_id);
        let wt_path = worktree_path(&self.base_dir, repository_id, user_id, branch);
        let sanitized = sanitize_branch(branch);

        if !wt_path.exists() {
            return Ok(OperationOutcome::ok("worktree already absent"));
        }

        tokio::task::spawn_blocking(move || -> Result<OperationOutcome, OrchestratorError> {
            let repo = git2::Repository::open_bare(&repo_dir)
                .map_err(|e| OrchestratorError::wrap(ErrorKind::GitOperationFailed, e))?;
            if let Ok(worktree) = repo.find_worktree(&sanitized) {
                // `--force`: prune even if the working dir has local modifications.
                let mut prune_opts = git2::WorktreePruneOptions::new();
                prune_opts.valid(true).working_tree(true);
                worktree
                    .prune(Some(&mut prune_opts))
                    .map_err(|e| OrchestratorError::wrap(ErrorKind::GitOperationFailed, e))?;
            } else if wt_path.exists() {
                std::fs::remove_dir_all(&wt_path)
                    .map_err(|e| OrchestratorError::wrap(ErrorKind::GitOperationFailed, e))?;
            }
            Ok(OperationOutcome::ok("worktree removed"))
        })
        .await
        .map_err(|e| OrchestratorError::wrap(ErrorKind::GitOperationFailed, e))?
    }

    async fn list_branches(&self, repository_id: u64) -> Result<Vec<String>, OrchestratorError> {
        let repo_dir = repo_path(&self.base_dir, repository_id);
        tokio::task::spawn_blocking(move || -> Result<Vec<String>, OrchestratorError> {
            let repo = git2::Repository::open_bare(&repo_dir)
                .map_err(|e| OrchestratorError::wrap(ErrorKind::GitOperationFailed, e))?;
            if let Ok(mut remote) = repo.find_remote("origin") {
                let _ = remote.fetch(&[] as &[&str], None, None);
            }

            let mut branches = Vec::new();
            let refs = repo
                .references_glob("refs/remotes/origin/*")
                .map_err(|e| OrchestratorError::wrap(ErrorKind::GitOperationFailed, e))?;
            for reference in refs.flatten() {
                if let Some(name) = reference.shorthand() {
                    if name != "HEAD" && name != "origin/HEAD" {
                        branches.push(name.trim_start_matches("origin/").to_string());
                    }
                }
            }
            Ok(branches)
        })
        .await
        .map_err(|e| OrchestratorError::wrap(ErrorKind::GitOperationFailed, e))?
    }

    async fn create_branch(
        &self,
        repository_id: u64,
        branch: &str,
        base_branch: &str,
    ) -> Result<OperationOutcome, OrchestratorError> {
        if !is_valid_branch_name(branch) {
            return Err(OrchestratorError::new(
                ErrorKind::InvalidBranchName,
                format!("'{branch}' is not a valid branch name"),
            ));
        }

        let repo_dir = repo_path(&self.base_dir, repository_id);
        let branch = branch.to_string();
        let base_branch = base_branch.to_string();
        tokio::task::spawn_blocking(move || -> Result<OperationOutcome, OrchestratorError> {
            let repo = git2::Repository::open_bare(&repo_dir)
                .map_err(|e| OrchestratorError::wrap(ErrorKind::GitOperationFailed, e))?;

            let mut remote = repo
                .find_remote("origin")
                .map_err(|e| OrchestratorError::wrap(ErrorKind::GitOperationFailed, e))?;
            remote
                .fetch(&[&base_branch], None, None)
                .map_err(|e| OrchestratorError::wrap(ErrorKind::GitOperationFailed, e))?;

            let base_ref = format!("refs/remotes/origin/{base_branch}");
            let base_commit = repo
                .find_reference(&base_ref)
                .and_then(|r| r.peel_to_commit())
                .map_err(|e| OrchestratorError::wrap(ErrorKind::GitOperationFailed, e))?;

            repo.branch(&branch, &base_commit, false)
                .map_err(|e| OrchestratorError::wrap(ErrorKind::GitOperationFailed, e))?;

            let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
            remote
                .push(&[&refspec], None)
                .map_err(|e| OrchestratorError::wrap(ErrorKind::GitOperationFailed, e))?;

            info!(repository_id, %branch, %base_branch, "created and pushed branch");
            Ok(OperationOutcome::ok("branch created"))
        })
        .await
        .map_err(|e| OrchestratorError::wrap(ErrorKind::GitOperationFailed, e))?
    }

    async fn cleanup_worktrees(&self, repository_id: u64) -> Result<OperationOutcome, OrchestratorError> {
        let repo_dir = repo_path(&self.base_dir, repository_id);
        tokio::task::spawn_blocking(move || -> Result<OperationOutcome, OrchestratorError> {
            let repo = git2::Repository::open_bare(&repo_dir)
                .map_err(|e| OrchestratorError::wrap(ErrorKind::GitOperationFailed, e))?;
            let names = repo
                .worktrees()
                .map_err(|e| OrchestratorError::wrap(ErrorKind::GitOperationFailed, e))?;
            let mut pruned = 0u32;
            for name in names.iter().flatten() {
                if let Ok(worktree) = repo.find_worktree(name) {
                    if !worktree.is_valid() {
                        let mut opts = git2::WorktreePruneOptions::new();
                        opts.valid(true).working_tree(true);
                        if worktree.prune(Some(&mut opts)).is_ok() {
                            pruned += 1;
                        }
                    }
                }
            }
            warn!(repository_id, pruned, "pruned stale worktrees");
            Ok(OperationOutcome::ok(format!("pruned {pruned} worktree(s)")))
        })
        .await
        .map_err(|e| OrchestratorError::wrap(ErrorKind::GitOperationFailed, e))?
    }

    async fn update_repository(&self, repository_id: u64) -> Result<OperationOutcome, OrchestratorError> {
        let repo_dir = repo_path(&self.base_dir, repository_id);
        tokio::task::spawn_blocking(move || -> Result<OperationOutcome, OrchestratorError> {
            let repo = git2::Repository::open_bare(&repo_dir)
                .map_err(|e| OrchestratorError::wrap(ErrorKind::GitOperationFailed, e))?;
            let remote_names = repo
                .remotes()
                .map_err(|e| OrchestratorError::wrap(ErrorKind::GitOperationFailed, e))?;
            for name in remote_names.iter().flatten() {
                let mut remote = repo
                    .find_remote(name)
                    .map_err(|e| OrchestratorError::wrap(ErrorKind::GitOperationFailed, e))?;
                remote
                    .fetch(&[] as &[&str], None, None)
                    .map_err(|e| OrchestratorError::wrap(ErrorKind::GitOperationFailed, e))?;
                remote.prune(None).map_err(|e| OrchestratorError::wrap(ErrorKind::GitOperationFailed, e))?;
            }
            Ok(OperationOutcome::ok("repository updated"))
        })
        .await
        .map_err(|e| OrchestratorError::wrap(ErrorKind::GitOperationFailed, e))?
    }

    fn worktree_path(&self, repository_id: u64, user_id: u64, branch: &str) -> PathBuf {
        worktree_path(&self.base_dir, repository_id, user_id, branch)
    }
}

/// `core.sshCommand` form used when an SSH deploy key is present (spec
/// §4.5 `clone`).
pub fn ssh_command_for_key(key_path: &Path) -> String {
    format!("ssh -i {} -o StrictHostKeyChecking=no", key_path.display())
}

/// In-memory fake used by `#[cfg(test)]` code in `session-manager` and
/// `recovery-service` to exercise orchestration without a real git
/// toolchain on disk (mirrors `container_runtime::FakeContainerRuntime`).
pub struct FakeWorktreeProvider {
    base_dir: String,
    worktrees: std::sync::RwLock<std::collections::HashSet<(u64, u64, String)>>,
    branches: std::sync::RwLock<std::collections::HashMap<u64, Vec<String>>>,
}

impl FakeWorktreeProvider {
    pub fn new(base_dir: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            worktrees: std::sync::RwLock::new(std::collections::HashSet::new()),
            branches: std::sync::RwLock::new(std::collections::HashMap::new()),
        }
    }

    pub fn seed_branch(&self, repository_id: u64, branch: impl Into<String>) {
        self.branches.write().unwrap().entry(repository_id).or_default().push(branch.into());
    }
}

#[async_trait]
impl WorktreeProvider for FakeWorktreeProvider {
    async fn clone_repository(
        &self,
        url: &str,
        _repository_id: u64,
        _key_path: Option<PathBuf>,
    ) -> Result<OperationOutcome, OrchestratorError> {
        if !is_valid_git_url(url) {
            return Err(OrchestratorError::new(ErrorKind::InvalidGitUrl, format!("'{url}' is not a valid git URL")));
        }
        Ok(OperationOutcome::ok("cloned"))
    }

    async fn create_worktree(
        &self,
        repository_id: u64,
        branch: &str,
        user_id: u64,
    ) -> Result<OperationOutcome, OrchestratorError> {
        if !is_valid_branch_name(branch) {
            return Err(OrchestratorError::new(
                ErrorKind::InvalidBranchName,
                format!("'{branch}' is not a valid branch name"),
            ));
        }
        self.worktrees.write().unwrap().insert((repository_id, user_id, branch.to_string()));
        Ok(OperationOutcome::ok("worktree created"))
    }

    async fn remove_worktree(
        &self,
        repository_id: u64,
        branch: &str,
        user_id: u64,
    ) -> Result<OperationOutcome, OrchestratorError> {
        self.worktrees.write().unwrap().remove(&(repository_id, user_id, branch.to_string()));
        Ok(OperationOutcome::ok("worktree removed"))
    }

    async fn list_branches(&self, repository_id: u64) -> Result<Vec<String>, OrchestratorError> {
        Ok(self.branches.read().unwrap().get(&repository_id).cloned().unwrap_or_default())
    }

    async fn create_branch(
        &self,
        repository_id: u64,
        branch: &str,
        _base_branch: &str,
    ) -> Result<OperationOutcome, OrchestratorError> {
        if !is_valid_branch_name(branch) {
            return Err(OrchestratorError::new(
                ErrorKind::InvalidBranchName,
                format!("'{branch}' is not a valid branch name"),
            ));
        }
        self.branches.write().unwrap().entry(repository_id).or_default().push(branch.to_string());
        Ok(OperationOutcome::ok("branch created"))
    }

    async fn cleanup_worktrees(&self, _repository_id: u64) -> Result<OperationOutcome, OrchestratorError> {
        Ok(OperationOutcome::ok("pruned 0 worktree(s)"))
    }

    async fn update_repository(&self, _repository_id: u64) -> Result<OperationOutcome, OrchestratorError> {
        Ok(OperationOutcome::ok("repository updated"))
    }

    fn worktree_path(&self, repository_id: u64, user_id: u64, branch: &str) -> PathBuf {
        worktree_path(&self.base_dir, repository_id, user_id, branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_command_includes_the_key_path_and_no_host_checking() {
        let cmd = ssh_command_for_key(Path::new("/srv/git/ssh-keys/repo_1"));
        assert!(cmd.contains("-i /srv/git/ssh-keys/repo_1"));
        assert!(cmd.contains("StrictHostKeyChecking=no"));
    }
}
