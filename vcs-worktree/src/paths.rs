//! Deterministic path layout (spec §4.5, §6).

use std::path::PathBuf;

/// Replace every character outside `[A-Za-z0-9-_]` with `_` (spec §3
/// "Worktree" / §4.5 `sanitizedBranch`).
pub fn sanitize_branch(branch: &str) -> String {
    branch
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// `<base>/repositories/repo_<repoId>.git`
pub fn repo_path(base: &str, repository_id: u64) -> PathBuf {
    PathBuf::from(base).join("repositories").join(format!("repo_{repository_id}.git"))
}

/// `<base>/worktrees/repo_<repoId>/user_<userId>/<sanitizedBranch>`
pub fn worktree_path(base: &str, repository_id: u64, user_id: u64, branch: &str) -> PathBuf {
    PathBuf::from(base)
        .join("worktrees")
        .join(format!("repo_{repository_id}"))
        .join(format!("user_{user_id}"))
        .join(sanitize_branch(branch))
}

/// `<base>/ssh-keys/repo_<repoId>` (private key; `.pub` is the public half).
pub fn ssh_key_path(base: &str, repository_id: u64) -> PathBuf {
    PathBuf::from(base).join("ssh-keys").join(format!("repo_{repository_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_special_characters_to_underscore() {
        assert_eq!(sanitize_branch("feature/complex-branch_name@123"), "feature_complex-branch_name_123");
        assert_eq!(sanitize_branch("main"), "main");
    }

    #[test]
    fn builds_deterministic_paths() {
        assert_eq!(
            repo_path("/srv/git", 1),
            PathBuf::from("/srv/git/repositories/repo_1.git")
        );
        assert_eq!(
            worktree_path("/srv/git", 3, 2, "feature/x"),
            PathBuf::from("/srv/git/worktrees/repo_3/user_2/feature_x")
        );
        assert_eq!(ssh_key_path("/srv/git", 7), PathBuf::from("/srv/git/ssh-keys/repo_7"));
    }
}
