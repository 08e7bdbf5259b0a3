//! Subdomain / host derivation (spec §3, §8). A pure function: equal
//! inputs always produce an equal subdomain, and the result matches
//! `^ide-u\d+-r\d+-[a-z0-9](?:[a-z0-9-]*[a-z0-9])?$`.

/// `ide-u{userId}-r{repositoryId}-{sanitizedBranch}`, lowercased,
/// non-alphanumeric collapsed to a single `-`, trimmed of leading/trailing
/// `-`.
pub fn derive_subdomain(user_id: u64, repository_id: u64, branch: &str) -> String {
    let raw = format!("ide-u{user_id}-r{repository_id}-{branch}").to_lowercase();

    let mut collapsed = String::with_capacity(raw.len());
    let mut last_was_dash = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            collapsed.push(ch);
            last_was_dash = false;
        } else if !last_was_dash {
            collapsed.push('-');
            last_was_dash = true;
        }
    }
    collapsed.trim_matches('-').to_string()
}

/// Build the full user-facing URL for a subdomain.
pub fn derive_url(subdomain: &str, domain: &str, enable_tls: bool) -> String {
    let scheme = if enable_tls { "https" } else { "http" };
    format!("{scheme}://{subdomain}.{domain}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn happy_path_matches_spec_scenario_1() {
        assert_eq!(derive_subdomain(1, 1, "main"), "ide-u1-r1-main");
    }

    #[test]
    fn special_characters_collapse_to_single_dash() {
        assert_eq!(
            derive_subdomain(2, 3, "feature/complex-branch_name@123"),
            "ide-u2-r3-feature-complex-branch-name-123"
        );
    }

    #[test]
    fn is_pure_for_equal_inputs() {
        assert_eq!(derive_subdomain(5, 6, "develop"), derive_subdomain(5, 6, "develop"));
    }

    #[test]
    fn matches_the_spec_8_regex() {
        let pattern = Regex::new(r"^ide-u\d+-r\d+-[a-z0-9](?:[a-z0-9-]*[a-z0-9])?$").unwrap();
        for (u, r, b) in [(1u64, 1u64, "main"), (2, 3, "feature/complex-branch_name@123"), (9, 9, "a")] {
            let subdomain = derive_subdomain(u, r, b);
            assert!(pattern.is_match(&subdomain), "'{subdomain}' should match the spec regex");
        }
    }

    #[test]
    fn url_derivation_respects_tls_flag() {
        assert_eq!(derive_url("ide-u1-r1-main", "localhost", false), "http://ide-u1-r1-main.localhost");
        assert_eq!(derive_url("ide-u1-r1-main", "example.com", true), "https://ide-u1-r1-main.example.com");
    }
}
