use std::cmp::Ordering;

use super::Candidate;
use crate::account::Platform;

/// Mail providers whose addresses say nothing about an employer
const FREEMAIL_DOMAINS: [&str; 22] = [
    "gmail.com",
    "googlemail.com",
    "outlook.com",
    "hotmail.com",
    "live.com",
    "msn.com",
    "yahoo.com",
    "icloud.com",
    "me.com",
    "mac.com",
    "aol.com",
    "proton.me",
    "protonmail.com",
    "pm.me",
    "gmx.com",
    "gmx.de",
    "mail.com",
    "yandex.ru",
    "fastmail.com",
    "hey.com",
    "qq.com",
    "163.com",
];

/// Candidates describe the same identity
///
/// Usernames decide when both sides have one; email decides otherwise.
pub fn should_merge(a: &Candidate, b: &Candidate) -> bool {
    if a.has_username() && b.has_username() {
        return a.username.trim().eq_ignore_ascii_case(b.username.trim());
    }
    a.has_email() && b.has_email() && a.email.trim().eq_ignore_ascii_case(b.email.trim())
}

/// Picks between two values without depending on argument order
fn pick<T: Ord + Clone>(a: Option<&T>, a_conf: u8, b: Option<&T>, b_conf: u8) -> Option<T> {
    match (a, b) {
        (None, None) => None,
        (Some(v), None) | (None, Some(v)) => Some(v.clone()),
        (Some(x), Some(y)) => match a_conf.cmp(&b_conf) {
            Ordering::Greater => Some(x.clone()),
            Ordering::Less => Some(y.clone()),
            Ordering::Equal => Some(x.min(y).clone()),
        },
    }
}

fn non_blank(value: &String) -> Option<&String> {
    (!value.trim().is_empty()).then_some(value)
}

/// Union of both candidates' fields; the merge is commutative
pub fn merge_pair(a: &Candidate, b: &Candidate) -> Candidate {
    let (ac, bc) = (a.confidence, b.confidence);
    let text = |x: &String, y: &String| pick(non_blank(x), ac, non_blank(y), bc).unwrap_or_default();

    Candidate {
        alias: text(&a.alias, &b.alias),
        display_name: text(&a.display_name, &b.display_name),
        email: text(&a.email, &b.email),
        username: text(&a.username, &b.username),
        ssh_key_path: pick(a.ssh_key_path.as_ref(), ac, b.ssh_key_path.as_ref(), bc),
        sources: a.sources.union(&b.sources).cloned().collect(),
        confidence: ac.max(bc),
        platform_hints: a.platform_hints.union(&b.platform_hints).copied().collect(),
        gpg_key_id: pick(a.gpg_key_id.as_ref(), ac, b.gpg_key_id.as_ref(), bc),
    }
}

/// Folds matching candidates together until no pair matches
pub fn merge_all(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut merged: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let mut current = candidate;
        // Absorbing one entry can make `current` match another, so keep scanning.
        while let Some(index) = merged.iter().position(|m| should_merge(m, &current)) {
            let existing = merged.remove(index);
            current = merge_pair(&existing, &current);
        }
        merged.push(current);
    }
    merged
}

/// Resolves the hosting platform for a candidate
///
/// An unambiguous explicit hint wins, then a platform named in the email
/// domain, then the email domain's kind: free-mail maps to the public
/// platform, anything else to the enterprise family.
pub fn assign_platform(candidate: &Candidate) -> Platform {
    if candidate.platform_hints.len() == 1 {
        if let Some(platform) = candidate.platform_hints.first() {
            return *platform;
        }
    }

    let domain = candidate
        .email
        .rsplit_once('@')
        .map(|(_, d)| d.trim().to_ascii_lowercase())
        .unwrap_or_default();
    if domain.is_empty() {
        return Platform::Github;
    }
    if let Some(platform) = Platform::named_in(&domain) {
        return platform;
    }
    if FREEMAIL_DOMAINS.contains(&domain.as_str()) {
        Platform::Github
    } else {
        Platform::GithubEnterprise
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{SOURCE_GIT_GLOBAL, SOURCE_SSH_KEY};
    use std::path::PathBuf;

    fn ssh_candidate() -> Candidate {
        let mut c = Candidate::new("octocat", SOURCE_SSH_KEY, 7);
        c.username = "octocat".to_string();
        c.ssh_key_path = Some(PathBuf::from("/home/a/.ssh/id_ed25519_octocat"));
        c
    }

    fn cli_candidate() -> Candidate {
        let mut c = Candidate::new("octocat", "gh-cli", 8);
        c.username = "OctoCat".to_string();
        c.display_name = "Mona".to_string();
        c.email = "mona@github.com".to_string();
        c.platform_hints.insert(Platform::Github);
        c
    }

    #[test]
    fn test_merge_by_username_takes_union() {
        let merged = merge_pair(&ssh_candidate(), &cli_candidate());
        assert_eq!(merged.confidence, 8);
        assert_eq!(merged.display_name, "Mona");
        assert_eq!(merged.username, "OctoCat");
        assert!(merged.ssh_key_path.is_some());
        assert_eq!(merged.source_tag(), "gh-cli+ssh-key");
    }

    #[test]
    fn test_merge_is_commutative() {
        let (a, b) = (ssh_candidate(), cli_candidate());
        assert_eq!(merge_pair(&a, &b), merge_pair(&b, &a));
    }

    #[test]
    fn test_different_usernames_never_merge_on_email() {
        let mut a = cli_candidate();
        let mut b = cli_candidate();
        b.username = "hubot".to_string();
        assert!(!should_merge(&a, &b));
        a.username.clear();
        assert!(should_merge(&a, &b));
    }

    #[test]
    fn test_merge_all_is_transitive() {
        let mut global = Candidate::new("mona", SOURCE_GIT_GLOBAL, 5);
        global.email = "MONA@github.com".to_string();
        global.display_name = "Mona L".to_string();
        let merged = merge_all(vec![global, ssh_candidate(), cli_candidate()]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].sources.len(), 3);
        assert_eq!(merged[0].display_name, "Mona");
    }

    #[test]
    fn test_platform_assignment_order() {
        let mut c = Candidate::new("x", SOURCE_GIT_GLOBAL, 5);
        c.email = "dev@gitlab.example.org".to_string();
        assert_eq!(assign_platform(&c), Platform::Gitlab);
        c.platform_hints.insert(Platform::Bitbucket);
        assert_eq!(assign_platform(&c), Platform::Bitbucket);
        c.platform_hints.insert(Platform::Github);
        assert_eq!(assign_platform(&c), Platform::Gitlab);
        c.platform_hints.clear();
        c.email = "me@gmail.com".to_string();
        assert_eq!(assign_platform(&c), Platform::Github);
        c.email = "me@acme-corp.com".to_string();
        assert_eq!(assign_platform(&c), Platform::GithubEnterprise);
    }
}
