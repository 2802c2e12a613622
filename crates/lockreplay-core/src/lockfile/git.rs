//! Recognizing version-control specs in lockfiles.
//!
//! Accepted forms, all of which must end in `#<commit>`:
//!
//! - `git+<scheme>://...` (the `git+` discriminator is stripped)
//! - `git://...`
//! - hosted shorthands: `github:owner/repo`, `gitlab:owner/repo`,
//!   `bitbucket:owner/repo`

use super::GitSource;

const HOSTED: &[(&str, &str)] = &[
    ("github:", "https://github.com/"),
    ("gitlab:", "https://gitlab.com/"),
    ("bitbucket:", "https://bitbucket.org/"),
];

/// Whether `spec` names a version-control source, pinned or not.
#[must_use]
pub fn is_git_spec(spec: &str) -> bool {
    spec.starts_with("git+")
        || spec.starts_with("git://")
        || HOSTED.iter().any(|(prefix, _)| spec.starts_with(prefix))
}

/// Split a VCS spec into clone URL and commit.
///
/// Returns `None` if `spec` is not a VCS spec, has no fragment, or the
/// remainder is not a URL.
#[must_use]
pub fn parse_git_spec(spec: &str, from: Option<String>) -> Option<GitSource> {
    if !is_git_spec(spec) {
        return None;
    }

    let (location, commit) = spec.rsplit_once('#')?;
    if commit.is_empty() {
        return None;
    }

    let url = if let Some(rest) = location.strip_prefix("git+") {
        rest.to_string()
    } else if location.starts_with("git://") {
        location.to_string()
    } else {
        let (prefix, base) = HOSTED.iter().find(|(p, _)| location.starts_with(p))?;
        let path = location[prefix.len()..].trim_end_matches(".git");
        if path.split('/').filter(|s| !s.is_empty()).count() != 2 {
            return None;
        }
        format!("{base}{path}.git")
    };

    url::Url::parse(&url).ok()?;

    Some(GitSource {
        original: spec.to_string(),
        url,
        commit: commit.to_string(),
        from,
    })
}

/// Repository name from a clone URL: last path segment without `.git`.
#[must_use]
pub fn repo_name(url: &str) -> &str {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed.rsplit(['/', ':']).next().unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn test_git_plus_https() {
        let spec = format!("git+https://github.com/owner/repo.git#{SHA}");
        let source = parse_git_spec(&spec, None).unwrap();
        assert_eq!(source.url, "https://github.com/owner/repo.git");
        assert_eq!(source.commit, SHA);
        assert_eq!(source.original, spec);
    }

    #[test]
    fn test_git_plus_ssh() {
        let spec = format!("git+ssh://git@github.com/owner/repo.git#{SHA}");
        let source = parse_git_spec(&spec, Some("owner/repo".into())).unwrap();
        assert_eq!(source.url, "ssh://git@github.com/owner/repo.git");
        assert_eq!(source.from.as_deref(), Some("owner/repo"));
    }

    #[test]
    fn test_git_scheme_kept() {
        let source = parse_git_spec(&format!("git://example.com/r.git#{SHA}"), None).unwrap();
        assert_eq!(source.url, "git://example.com/r.git");
    }

    #[test]
    fn test_hosted_shorthand() {
        let source = parse_git_spec(&format!("github:owner/repo#{SHA}"), None).unwrap();
        assert_eq!(source.url, "https://github.com/owner/repo.git");

        let source = parse_git_spec(&format!("gitlab:group/proj.git#{SHA}"), None).unwrap();
        assert_eq!(source.url, "https://gitlab.com/group/proj.git");
    }

    #[test]
    fn test_rejects_unpinned_or_foreign() {
        assert!(parse_git_spec("git+https://github.com/owner/repo.git", None).is_none());
        assert!(parse_git_spec("git+https://github.com/owner/repo.git#", None).is_none());
        assert!(parse_git_spec("https://registry.npmjs.org/a/-/a-1.0.0.tgz#abc", None).is_none());
        assert!(parse_git_spec(&format!("github:justowner#{SHA}"), None).is_none());
    }

    #[test]
    fn test_is_git_spec() {
        assert!(is_git_spec("git+https://x/y.git"));
        assert!(is_git_spec("bitbucket:a/b"));
        assert!(!is_git_spec("^1.2.3"));
        assert!(!is_git_spec("https://codeload.github.com/a/b/tar.gz/abc"));
    }

    #[test]
    fn test_repo_name() {
        assert_eq!(repo_name("https://github.com/owner/repo.git"), "repo");
        assert_eq!(repo_name("https://github.com/owner/repo/"), "repo");
        assert_eq!(repo_name("git@github.com:repo.git"), "repo");
    }
}
