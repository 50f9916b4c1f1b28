//! Validation for registry, repository, reference, and key names.

const MAX_REGISTRY_NAME_LEN: usize = 64;

/// Check a registry (tenant namespace) name: `[A-Za-z0-9_-]{1,64}`.
pub fn valid_registry_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_REGISTRY_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn valid_repo_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// Check a full repository path: slash-separated segments of `[A-Za-z0-9._-]+`.
pub fn valid_repo_name(repo: &str) -> bool {
    if repo.is_empty() || repo.contains("..") {
        return false;
    }
    repo.split('/').all(valid_repo_segment)
}

/// Check a manifest reference: a tag or a literal digest string.
/// Never contains a slash or backslash, and never `.` / `..`.
pub fn valid_reference(reference: &str) -> bool {
    if reference.is_empty() || reference == "." || reference == ".." {
        return false;
    }
    !reference.contains('/') && !reference.contains('\\')
}

/// Check an API key display name: `[A-Za-z0-9._-]{2,8}`.
pub fn valid_key_name(name: &str) -> bool {
    (2..=8).contains(&name.len()) && valid_repo_segment(name)
}

/// The registry namespace of a repository path: the prefix before the first
/// slash, or the whole name when there is none.
pub fn registry_namespace(repo: &str) -> &str {
    match repo.find('/') {
        Some(idx) => &repo[..idx],
        None => repo,
    }
}

/// Strip the registry namespace prefix from a full repository path,
/// returning the portion stored against the registry.
/// e.g. `"myregistry/group/app"` → `"group/app"`.
pub fn repo_leaf(repo: &str) -> &str {
    match repo.find('/') {
        Some(idx) => &repo[idx + 1..],
        None => repo,
    }
}

/// Check an upload id: 36 chars of lowercase hex and dashes (UUID shape).
pub fn valid_upload_id(id: &str) -> bool {
    id.len() == 36
        && id
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b) || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_names() {
        assert!(valid_registry_name("alpha"));
        assert!(valid_registry_name("Alpha_1-2"));
        assert!(!valid_registry_name(""));
        assert!(!valid_registry_name("has.dot"));
        assert!(!valid_registry_name("has/slash"));
        assert!(!valid_registry_name(&"a".repeat(65)));
        assert!(valid_registry_name(&"a".repeat(64)));
    }

    #[test]
    fn test_repo_names() {
        assert!(valid_repo_name("alpha/app"));
        assert!(valid_repo_name("alpha/group/app.v2"));
        assert!(valid_repo_name("single"));
        assert!(!valid_repo_name(""));
        assert!(!valid_repo_name("alpha//app"));
        assert!(!valid_repo_name("alpha/../etc"));
        assert!(!valid_repo_name("/leading"));
        assert!(!valid_repo_name("trailing/"));
        assert!(!valid_repo_name("sp ace"));
    }

    #[test]
    fn test_references() {
        assert!(valid_reference("latest"));
        assert!(valid_reference("v1.2.3"));
        assert!(valid_reference(&format!("sha256:{}", "a".repeat(64))));
        assert!(!valid_reference(""));
        assert!(!valid_reference("."));
        assert!(!valid_reference(".."));
        assert!(!valid_reference("has/slash"));
        assert!(!valid_reference("has\\backslash"));
    }

    #[test]
    fn test_namespace_and_leaf() {
        assert_eq!(registry_namespace("alpha/group/app"), "alpha");
        assert_eq!(registry_namespace("alpha"), "alpha");
        assert_eq!(repo_leaf("alpha/group/app"), "group/app");
        assert_eq!(repo_leaf("alpha"), "alpha");
    }

    #[test]
    fn test_key_names() {
        assert!(valid_key_name("ci"));
        assert!(valid_key_name("deploy.1"));
        assert!(!valid_key_name("x"));
        assert!(!valid_key_name("morethan8c"));
        assert!(!valid_key_name("no space"));
    }

    #[test]
    fn test_upload_ids() {
        assert!(valid_upload_id("3fa85f64-5717-4562-b3fc-2c963f66afa6"));
        assert!(!valid_upload_id("3FA85F64-5717-4562-B3FC-2C963F66AFA6"));
        assert!(!valid_upload_id("not-a-uuid"));
    }
}
