//! Branch name and git URL validation (spec §3, §4.5, §8).

use regex::Regex;
use std::sync::OnceLock;

fn ssh_url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\w.-]+@[\w.-]+:[\w.-]+/[\w.-]+\.git$").unwrap())
}

fn https_url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^https://[\w.-]+/[\w.-]+/[\w.-]+\.git$").unwrap())
}

/// `git@host:user/repo.git` or `https://host/user/repo.git` only — no
/// `http://`, no SSH URLs missing the `:` path separator, no `.git`-less
/// HTTPS URLs (spec §8).
pub fn is_valid_git_url(url: &str) -> bool {
    ssh_url_pattern().is_match(url) || https_url_pattern().is_match(url)
}

const MAX_BRANCH_LEN: usize = 250;
const FORBIDDEN_SUBSTRINGS: &[&str] = &["..", "@{"];
const FORBIDDEN_CHARS: &[char] = &['~', '^', ':', '?', '*', '[', ']', '\\'];

/// Validate a branch name against the VCS rules in spec §3: no leading
/// `-`, no `..`, no trailing `/` or `.`, no control chars, no whitespace,
/// none of `~^:?*[]\`, no `@{`, not ending in `.lock`, `<= 250` chars.
pub fn is_valid_branch_name(branch: &str) -> bool {
    if branch.is_empty() || branch.len() > MAX_BRANCH_LEN {
        return false;
    }
    if branch.starts_with('-') {
        return false;
    }
    if branch.ends_with('/') || branch.ends_with('.') {
        return false;
    }
    if branch.ends_with(".lock") {
        return false;
    }
    if branch.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return false;
    }
    if FORBIDDEN_CHARS.iter().any(|c| branch.contains(*c)) {
        return false;
    }
    if FORBIDDEN_SUBSTRINGS.iter().any(|s| branch.contains(s)) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_the_spec_examples() {
        for branch in ["main", "feature/test", "bugfix/issue-123", "release/v1.0.0"] {
            assert!(is_valid_branch_name(branch), "{branch} should be valid");
        }
    }

    #[test]
    fn rejects_every_invalid_pattern() {
        for branch in [
            "-leading-dash",
            "has..dotdot",
            "trailing/",
            "trailing.",
            "weird~name",
            "weird^name",
            "weird:name",
            "weird?name",
            "weird*name",
            "weird[name]",
            "weird\\name",
            "name@{1}",
            "name.lock",
            "has space",
            "",
        ] {
            assert!(!is_valid_branch_name(branch), "{branch} should be invalid");
        }
        let too_long = "a".repeat(251);
        assert!(!is_valid_branch_name(&too_long));
    }

    #[test]
    fn git_url_validation_matches_spec_8() {
        assert!(is_valid_git_url("git@host:u/r.git"));
        assert!(is_valid_git_url("https://host/u/r.git"));
        assert!(!is_valid_git_url("http://host/u/r.git"));
        assert!(!is_valid_git_url("git@host/u/r.git"));
        assert!(!is_valid_git_url("https://host/u/r"));
    }
}
