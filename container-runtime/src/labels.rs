//! Label namespace the runtime adapter uses to mark and find its own
//! containers (spec §4.6). All listings filter on `managed=true`.

pub const LABEL_MANAGED: &str = "managed";
pub const LABEL_USER_ID: &str = "user-id";
pub const LABEL_REPOSITORY_ID: &str = "repository-id";
pub const LABEL_BRANCH_NAME: &str = "branch-name";
pub const LABEL_CREATED: &str = "created";
pub const LABEL_LAST_ACCESSED: &str = "last-accessed";
pub const LABEL_SECURITY_PROFILE: &str = "security-profile";

/// The required label set every running managed container must carry
/// (spec §8).
pub const REQUIRED_LABELS: &[&str] = &[
    LABEL_MANAGED,
    LABEL_USER_ID,
    LABEL_REPOSITORY_ID,
    LABEL_BRANCH_NAME,
    LABEL_CREATED,
    LABEL_LAST_ACCESSED,
    LABEL_SECURITY_PROFILE,
];

pub fn container_name(user_id: u64, repository_id: u64, branch: &str) -> String {
    let safe_branch: String = branch
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("ide_user_{user_id}_repo_{repository_id}_{safe_branch}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_sanitizes_branch() {
        assert_eq!(
            container_name(2, 3, "feature/complex-branch_name@123"),
            "ide_user_2_repo_3_feature_complex-branch_name_123".replace('-', "_")
        );
    }
}
