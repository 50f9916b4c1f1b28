//! Distribution v2 URL parsing and scope requirements.
//!
//! Repository names span path segments, so routes are parsed from the
//! catch-all path rather than the router's pattern language. Matching is
//! greedy on the repository portion, like the upstream wire grammar.

use axum::http::Method;

/// Strip the `/v2` mount segment from a request path, exactly once, and
/// only when it is a complete segment. Registry names may themselves begin
/// with `v2` (`v2hub/app` is a legal repository), so repeated or partial
/// prefix trimming would corrupt them. The result has no leading slash.
pub fn v2_relative_path(path: &str) -> &str {
    let rest = match path.strip_prefix("/v2") {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => path,
    };
    rest.strip_prefix('/').unwrap_or(rest)
}

/// A parsed `/v2/…` route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum V2Route {
    /// `/v2/` or `/v2`.
    Root,
    /// `/v2/token`.
    Token,
    /// `POST /v2/<repo>/blobs/uploads/`.
    StartUpload { repo: String },
    /// `PATCH|PUT|DELETE /v2/<repo>/blobs/uploads/<uuid>`.
    Upload { repo: String, upload_id: String },
    /// `HEAD|GET /v2/<repo>/blobs/<digest>`.
    Blob { repo: String, digest: String },
    /// `PUT|HEAD|GET /v2/<repo>/manifests/<reference>`.
    Manifest { repo: String, reference: String },
}

/// Parse a path relative to `/v2/` (leading slash already stripped).
pub fn parse_v2_path(relative: &str) -> Option<V2Route> {
    let relative = relative.trim_start_matches('/');
    if relative.is_empty() {
        return Some(V2Route::Root);
    }
    if relative.trim_matches('/') == "token" {
        return Some(V2Route::Token);
    }

    if let Some(repo) = relative.strip_suffix("/blobs/uploads/") {
        if repo.is_empty() {
            return None;
        }
        return Some(V2Route::StartUpload {
            repo: repo.to_string(),
        });
    }

    if let Some(idx) = relative.rfind("/blobs/uploads/") {
        let repo = &relative[..idx];
        let upload_id = &relative[idx + "/blobs/uploads/".len()..];
        if !repo.is_empty() && !upload_id.is_empty() && !upload_id.contains('/') {
            return Some(V2Route::Upload {
                repo: repo.to_string(),
                upload_id: upload_id.to_string(),
            });
        }
        return None;
    }

    if let Some(idx) = relative.rfind("/manifests/") {
        let repo = &relative[..idx];
        let reference = &relative[idx + "/manifests/".len()..];
        if !repo.is_empty() && !reference.is_empty() && !reference.contains('/') {
            return Some(V2Route::Manifest {
                repo: repo.to_string(),
                reference: reference.to_string(),
            });
        }
        return None;
    }

    if let Some(idx) = relative.rfind("/blobs/") {
        let repo = &relative[..idx];
        let digest = &relative[idx + "/blobs/".len()..];
        if !repo.is_empty() && !digest.is_empty() && !digest.contains('/') {
            return Some(V2Route::Blob {
                repo: repo.to_string(),
                digest: digest.to_string(),
            });
        }
        return None;
    }

    None
}

/// A `(repository, action)` pair a request must be authorized for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScopeRequirement {
    pub repository: String,
    pub action: String,
}

impl ScopeRequirement {
    pub fn is_empty(&self) -> bool {
        self.repository.is_empty()
    }

    /// The challenge scope string for `WWW-Authenticate`.
    pub fn challenge(&self) -> String {
        if self.is_empty() {
            String::new()
        } else {
            format!("repository:{}:{}", self.repository, self.action)
        }
    }
}

fn scope(repository: &str, action: &str) -> ScopeRequirement {
    ScopeRequirement {
        repository: repository.to_string(),
        action: action.to_string(),
    }
}

/// The scope a request needs, derived from its method and parsed route.
/// Requests with no matching route (or no protected resource) need none.
pub fn required_scope(relative: &str, method: &Method) -> ScopeRequirement {
    let Some(route) = parse_v2_path(relative) else {
        return ScopeRequirement::default();
    };

    match route {
        V2Route::StartUpload { repo } if *method == Method::POST => scope(&repo, "push"),
        V2Route::Upload { repo, .. }
            if *method == Method::PATCH || *method == Method::PUT || *method == Method::DELETE =>
        {
            scope(&repo, "push")
        }
        V2Route::Blob { repo, .. } if *method == Method::HEAD || *method == Method::GET => {
            scope(&repo, "pull")
        }
        V2Route::Manifest { repo, .. } if *method == Method::PUT => scope(&repo, "push"),
        V2Route::Manifest { repo, .. } if *method == Method::HEAD || *method == Method::GET => {
            scope(&repo, "pull")
        }
        _ => ScopeRequirement::default(),
    }
}

/// The `Range` header value for an upload of the given size.
pub fn upload_range(size: i64) -> String {
    if size <= 0 {
        "0-0".to_string()
    } else {
        format!("0-{}", size - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v2_relative_path_strips_mount_segment_once() {
        assert_eq!(v2_relative_path("/v2"), "");
        assert_eq!(v2_relative_path("/v2/"), "");
        assert_eq!(v2_relative_path("/v2/token"), "token");
        assert_eq!(
            v2_relative_path("/v2/alpha/app/blobs/uploads/"),
            "alpha/app/blobs/uploads/"
        );
        // A registry namespace may itself start with "v2"
        assert_eq!(
            v2_relative_path("/v2/v2hub/app/manifests/latest"),
            "v2hub/app/manifests/latest"
        );
        assert_eq!(
            v2_relative_path("/v2/v2/app/blobs/uploads/"),
            "v2/app/blobs/uploads/"
        );
        // An already-stripped path passes through untouched
        assert_eq!(
            v2_relative_path("/v2hub/app/manifests/latest"),
            "v2hub/app/manifests/latest"
        );
        assert_eq!(
            v2_relative_path("/v2-prod/app/blobs/uploads/"),
            "v2-prod/app/blobs/uploads/"
        );
    }

    #[test]
    fn test_parse_root_and_token() {
        assert_eq!(parse_v2_path(""), Some(V2Route::Root));
        assert_eq!(parse_v2_path("/"), Some(V2Route::Root));
        assert_eq!(parse_v2_path("token"), Some(V2Route::Token));
        assert_eq!(parse_v2_path("token/"), Some(V2Route::Token));
    }

    #[test]
    fn test_parse_upload_routes() {
        assert_eq!(
            parse_v2_path("alpha/app/blobs/uploads/"),
            Some(V2Route::StartUpload {
                repo: "alpha/app".into()
            })
        );
        assert_eq!(
            parse_v2_path("alpha/app/blobs/uploads/some-uuid"),
            Some(V2Route::Upload {
                repo: "alpha/app".into(),
                upload_id: "some-uuid".into()
            })
        );
        // Nested repository paths keep the greedy repo match
        assert_eq!(
            parse_v2_path("alpha/group/app/blobs/uploads/u1"),
            Some(V2Route::Upload {
                repo: "alpha/group/app".into(),
                upload_id: "u1".into()
            })
        );
        assert_eq!(parse_v2_path("/blobs/uploads/"), None);
    }

    #[test]
    fn test_parse_blob_and_manifest_routes() {
        let digest = format!("sha256:{}", "a".repeat(64));
        assert_eq!(
            parse_v2_path(&format!("alpha/app/blobs/{digest}")),
            Some(V2Route::Blob {
                repo: "alpha/app".into(),
                digest: digest.clone()
            })
        );
        assert_eq!(
            parse_v2_path("alpha/app/manifests/latest"),
            Some(V2Route::Manifest {
                repo: "alpha/app".into(),
                reference: "latest".into()
            })
        );
        assert_eq!(parse_v2_path("alpha/app/tags/list"), None);
    }

    #[test]
    fn test_required_scopes() {
        assert_eq!(
            required_scope("alpha/app/blobs/uploads/", &Method::POST),
            scope("alpha/app", "push")
        );
        assert_eq!(
            required_scope("alpha/app/blobs/uploads/u1", &Method::PATCH),
            scope("alpha/app", "push")
        );
        assert_eq!(
            required_scope("alpha/app/blobs/uploads/u1", &Method::DELETE),
            scope("alpha/app", "push")
        );
        assert_eq!(
            required_scope("alpha/app/blobs/sha256:abc", &Method::GET),
            scope("alpha/app", "pull")
        );
        assert_eq!(
            required_scope("alpha/app/manifests/latest", &Method::PUT),
            scope("alpha/app", "push")
        );
        assert_eq!(
            required_scope("alpha/app/manifests/latest", &Method::HEAD),
            scope("alpha/app", "pull")
        );
        assert!(required_scope("token", &Method::GET).is_empty());
        assert!(required_scope("", &Method::GET).is_empty());
        assert!(required_scope("alpha/app/unknown", &Method::GET).is_empty());
    }

    #[test]
    fn test_challenge_format() {
        assert_eq!(
            scope("alpha/app", "push").challenge(),
            "repository:alpha/app:push"
        );
        assert_eq!(ScopeRequirement::default().challenge(), "");
    }

    #[test]
    fn test_upload_range() {
        assert_eq!(upload_range(0), "0-0");
        assert_eq!(upload_range(-1), "0-0");
        assert_eq!(upload_range(17), "0-16");
    }
}
