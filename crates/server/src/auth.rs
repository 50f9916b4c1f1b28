//! Registry authentication: bearer middleware for the `/v2` surface and
//! the Basic-auth path used by the token endpoint.

use crate::error::{OciError, OciResult};
use crate::state::AppState;
use crate::v2::{required_scope, v2_relative_path};
use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, HOST, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use berth_core::access::{KeyScope, token_access_allows};
use berth_core::name::{registry_namespace, valid_registry_name};
use berth_core::{Permission, apikey};
use berth_metadata::repos::{ApiKeyRepo, RegistryRepo};
use uuid::Uuid;

/// Header name/value stamped on every `/v2` response.
pub const API_VERSION_HEADER: &str = "Docker-Distribution-API-Version";
pub const API_VERSION_VALUE: &str = "registry/2.0";

/// Authenticated registry request context, set by the bearer middleware.
#[derive(Clone, Debug)]
pub struct RegistryAuth {
    /// Registry namespace the bearer token's subject names.
    pub namespace: String,
}

/// The service name used as token issuer/audience for this request.
pub fn service_for_request(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(service) = &state.service {
        return service.clone();
    }
    headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "berth-registry".to_string())
}

/// The token realm URL advertised in bearer challenges.
pub fn token_realm(state: &AppState, headers: &HeaderMap) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|proto| !proto.is_empty())
        .unwrap_or("http");
    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| service_for_request(state, headers));
    format!("{scheme}://{host}/v2/token")
}

fn bearer_challenge(realm: &str, service: &str, scope: &str) -> HeaderValue {
    let mut challenge = format!(r#"Bearer realm="{realm}",service="{service}""#);
    if !scope.is_empty() {
        challenge.push_str(&format!(r#",scope="{scope}""#));
    }
    HeaderValue::from_str(&challenge)
        .unwrap_or_else(|_| HeaderValue::from_static(r#"Bearer realm="registry""#))
}

fn challenge_response(err: OciError, realm: &str, service: &str, scope: &str) -> Response {
    let mut response = err.into_response();
    response
        .headers_mut()
        .insert(WWW_AUTHENTICATE, bearer_challenge(realm, service, scope));
    response
}

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .and_then(|v| {
            // RFC 6750: the scheme is case-insensitive
            if v.len() > 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(v[7..].trim())
            } else {
                None
            }
        })
        .filter(|token| !token.is_empty())
}

/// Bearer middleware for the `/v2` surface. The token endpoint itself is
/// exempt; everything else requires a verified token whose access list
/// covers the scope the request needs. Every response carries the
/// Distribution API version header.
pub async fn v2_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let relative = v2_relative_path(req.uri().path()).to_string();
    let is_token_path = relative.trim_matches('/') == "token";

    let mut response = if is_token_path {
        next.run(req).await
    } else {
        let requirement = required_scope(&relative, req.method());
        let challenge_scope = requirement.challenge();
        let realm = token_realm(&state, req.headers());
        let service = service_for_request(&state, req.headers());

        let Some(token) = extract_bearer_token(req.headers()) else {
            return stamp_api_version(challenge_response(
                OciError::unauthorized(),
                &realm,
                &service,
                &challenge_scope,
            ));
        };

        match state.authority.verify(token, &service) {
            Ok(claims) => {
                let namespace = claims.sub.trim().to_string();
                if !valid_registry_name(&namespace) {
                    return stamp_api_version(challenge_response(
                        OciError::unauthorized(),
                        &realm,
                        &service,
                        &challenge_scope,
                    ));
                }

                if !requirement.is_empty()
                    && !token_access_allows(
                        &claims.access,
                        &requirement.repository,
                        &requirement.action,
                    )
                {
                    return stamp_api_version(challenge_response(
                        OciError::denied(StatusCode::UNAUTHORIZED),
                        &realm,
                        &service,
                        &challenge_scope,
                    ));
                }

                req.extensions_mut().insert(RegistryAuth { namespace });
                next.run(req).await
            }
            Err(_) => {
                return stamp_api_version(challenge_response(
                    OciError::unauthorized(),
                    &realm,
                    &service,
                    &challenge_scope,
                ));
            }
        }
    };

    response.headers_mut().insert(
        API_VERSION_HEADER,
        HeaderValue::from_static(API_VERSION_VALUE),
    );
    response
}

fn stamp_api_version(mut response: Response) -> Response {
    response.headers_mut().insert(
        API_VERSION_HEADER,
        HeaderValue::from_static(API_VERSION_VALUE),
    );
    response
}

/// Pull the middleware-set auth context out of a request.
pub fn registry_auth(req: &Request) -> OciResult<RegistryAuth> {
    req.extensions()
        .get::<RegistryAuth>()
        .cloned()
        .ok_or_else(OciError::unauthorized)
}

/// Reject requests whose repository lies outside the caller's namespace.
pub fn ensure_repo_authorized(auth: &RegistryAuth, repo: &str) -> OciResult<()> {
    let namespace = registry_namespace(repo);
    if namespace.is_empty() {
        return Err(OciError::name_invalid());
    }
    if namespace != auth.namespace {
        return Err(OciError::denied(StatusCode::FORBIDDEN));
    }
    Ok(())
}

/// Outcome of Basic authentication at the token endpoint.
#[derive(Debug)]
pub struct RegistryBasicAuth {
    pub user_id: Uuid,
    pub api_key_id: Uuid,
    pub registry_id: Uuid,
    pub namespace: String,
    pub scopes: Vec<KeyScope>,
}

/// Errors from the Basic-auth path. Bad credentials collapse into a
/// single `Unauthorized` so the response never leaks which step failed.
#[derive(Debug)]
pub enum BasicAuthError {
    Unauthorized,
    Internal(String),
}

fn parse_basic_auth(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    if value.len() < 6 || !value[..6].eq_ignore_ascii_case("basic ") {
        return None;
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(value[6..].trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Authenticate Basic credentials: username = registry name, password =
/// full `sk_…` secret. Finds the registry, walks the owning org's API
/// keys, and matches the decrypted secret in constant time.
pub async fn authenticate_registry_basic(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<RegistryBasicAuth, BasicAuthError> {
    let Some((username, password)) = parse_basic_auth(headers) else {
        return Err(BasicAuthError::Unauthorized);
    };

    let namespace = username.trim().to_string();
    if !valid_registry_name(&namespace) {
        return Err(BasicAuthError::Unauthorized);
    }

    let registry = state
        .metadata
        .get_registry_by_name(&namespace)
        .await
        .map_err(|e| BasicAuthError::Internal(e.to_string()))?
        .ok_or(BasicAuthError::Unauthorized)?;

    let password = password.trim();
    if apikey::parse_api_key_prefix(password).is_err() {
        return Err(BasicAuthError::Unauthorized);
    }

    let keys = state
        .metadata
        .list_api_keys_for_org(registry.org_id)
        .await
        .map_err(|e| BasicAuthError::Internal(e.to_string()))?;

    let mut matched = None;
    for candidate in keys {
        let Ok(decrypted) = state.api_keys.decrypt(&candidate.key.secret_encrypted) else {
            tracing::warn!(api_key_id = %candidate.key.id, "could not decrypt stored API key");
            continue;
        };
        if apikey::matches_api_key(password, &decrypted) {
            matched = Some(candidate);
            break;
        }
    }
    let matched = matched.ok_or(BasicAuthError::Unauthorized)?;

    // Record usage without delaying the response.
    {
        let metadata = state.metadata.clone();
        let key_id = matched.key.id;
        tokio::spawn(async move {
            if let Err(e) = metadata.touch_api_key_last_used(key_id).await {
                tracing::warn!(api_key_id = %key_id, error = %e, "failed to touch API key");
            }
        });
    }

    let scopes = matched
        .scopes
        .iter()
        .filter_map(|row| match Permission::parse(&row.permission) {
            Ok(permission) => Some(KeyScope {
                registry_id: row.registry_id,
                repository: row.repository_name.clone(),
                permission,
            }),
            Err(_) => {
                tracing::warn!(
                    scope_id = %row.id,
                    permission = %row.permission,
                    "API key scope carries unknown permission, ignoring"
                );
                None
            }
        })
        .collect();

    Ok(RegistryBasicAuth {
        user_id: matched.key.user_id,
        api_key_id: matched.key.id,
        registry_id: registry.id,
        namespace,
        scopes,
    })
}

/// Basic challenge for the token endpoint itself.
pub fn basic_unauthorized() -> Response {
    let mut response = OciError::unauthorized().into_response();
    response.headers_mut().insert(
        WWW_AUTHENTICATE,
        HeaderValue::from_static(r#"Basic realm="registry""#),
    );
    response
}

/// Resolve the registry id for a repository from the authenticated
/// namespace; a missing row means the token subject no longer names a
/// registry.
pub async fn resolve_registry_id(state: &AppState, repo: &str) -> OciResult<Uuid> {
    let namespace = registry_namespace(repo);
    if namespace.is_empty() {
        return Err(OciError::name_invalid());
    }
    let registry = state
        .metadata
        .get_registry_by_name(namespace)
        .await
        .map_err(|e| crate::error::internal_error("failed to resolve registry", e))?;
    match registry {
        Some(registry) => Ok(registry.id),
        None => Err(OciError::denied(StatusCode::FORBIDDEN)),
    }
}
