//! Management-session verification.
//!
//! The management surface authenticates with JWTs issued by an external
//! identity provider. Verification keys come from the provider's JWKS
//! endpoint and are cached in-process; the cache refetches on unknown key
//! ids, with a minimum interval so a flood of bad tokens cannot hammer
//! the provider.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Minimum interval between JWKS refetches.
const MIN_REFETCH_INTERVAL: Duration = Duration::from_secs(30);

/// Claims extracted from a verified session token.
#[derive(Clone, Debug, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Session verification errors. Anything wrong with the token itself is
/// `Unauthorized`; provider trouble is `Fetch`.
#[derive(Debug)]
pub enum SessionError {
    Unauthorized,
    Fetch(String),
}

#[derive(Debug, Deserialize)]
struct RemoteJwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
    #[serde(default)]
    x: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteJwkSet {
    keys: Vec<RemoteJwk>,
}

struct CachedKey {
    key: DecodingKey,
    algorithm: Algorithm,
}

#[derive(Default)]
struct KeyCache {
    keys: HashMap<String, CachedKey>,
    fetched_at: Option<Instant>,
}

/// Verifies IdP-issued session JWTs against a cached remote JWKS.
pub struct SessionVerifier {
    jwks_url: String,
    client: reqwest::Client,
    cache: RwLock<KeyCache>,
}

impl SessionVerifier {
    pub fn new(jwks_url: impl Into<String>) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            client: reqwest::Client::new(),
            cache: RwLock::new(KeyCache::default()),
        }
    }

    /// Verify a session token and return its claims.
    pub async fn verify(&self, token: &str) -> Result<SessionClaims, SessionError> {
        let header = decode_header(token).map_err(|_| SessionError::Unauthorized)?;
        let kid = header.kid.ok_or(SessionError::Unauthorized)?;

        if !matches!(header.alg, Algorithm::RS256 | Algorithm::EdDSA) {
            return Err(SessionError::Unauthorized);
        }

        if let Some(claims) = self.try_verify(&kid, header.alg, token).await? {
            return Ok(claims);
        }

        // Unknown kid: the provider may have rotated keys.
        self.refetch().await?;
        match self.try_verify(&kid, header.alg, token).await? {
            Some(claims) => Ok(claims),
            None => Err(SessionError::Unauthorized),
        }
    }

    async fn try_verify(
        &self,
        kid: &str,
        alg: Algorithm,
        token: &str,
    ) -> Result<Option<SessionClaims>, SessionError> {
        let cache = self.cache.read().await;
        let Some(cached) = cache.keys.get(kid) else {
            return Ok(None);
        };
        if cached.algorithm != alg {
            return Err(SessionError::Unauthorized);
        }

        let mut validation = Validation::new(cached.algorithm);
        // Audience/issuer are provider-specific; expiry is what matters here.
        validation.validate_aud = false;

        let data = decode::<SessionClaims>(token, &cached.key, &validation)
            .map_err(|_| SessionError::Unauthorized)?;
        if data.claims.sub.trim().is_empty() {
            return Err(SessionError::Unauthorized);
        }
        Ok(Some(data.claims))
    }

    async fn refetch(&self) -> Result<(), SessionError> {
        let mut cache = self.cache.write().await;
        if let Some(fetched_at) = cache.fetched_at {
            if fetched_at.elapsed() < MIN_REFETCH_INTERVAL {
                return Ok(());
            }
        }

        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| SessionError::Fetch(format!("JWKS fetch failed: {e}")))?;
        let jwks: RemoteJwkSet = response
            .json()
            .await
            .map_err(|e| SessionError::Fetch(format!("invalid JWKS document: {e}")))?;

        let mut keys = HashMap::with_capacity(jwks.keys.len());
        for jwk in jwks.keys {
            let Some(kid) = jwk.kid.clone() else {
                continue;
            };
            match build_key(&jwk) {
                Some(cached) => {
                    keys.insert(kid, cached);
                }
                None => {
                    tracing::warn!(kid = %kid, kty = %jwk.kty, "skipping unsupported JWKS key");
                }
            }
        }

        tracing::debug!(count = keys.len(), "refreshed session JWKS cache");
        cache.keys = keys;
        cache.fetched_at = Some(Instant::now());
        Ok(())
    }
}

/// Authenticate a management request: verify the session bearer and mirror
/// the user row on first sight.
pub async fn require_user(
    state: &crate::state::AppState,
    headers: &axum::http::HeaderMap,
) -> crate::error::ApiResult<berth_metadata::models::UserRow> {
    use crate::error::ApiError;
    use berth_metadata::repos::UserRepo;

    let token = crate::auth::extract_bearer_token(headers).ok_or(ApiError::Unauthorized)?;
    let claims = match state.sessions.verify(token).await {
        Ok(claims) => claims,
        Err(SessionError::Unauthorized) => return Err(ApiError::Unauthorized),
        Err(SessionError::Fetch(e)) => {
            return Err(ApiError::Internal(anyhow::anyhow!(e)));
        }
    };

    let email = claims
        .email
        .clone()
        .unwrap_or_else(|| format!("{}@unknown", claims.sub));
    state
        .metadata
        .ensure_user(&claims.sub, &email)
        .await
        .map_err(ApiError::from)
}

fn build_key(jwk: &RemoteJwk) -> Option<CachedKey> {
    match jwk.kty.as_str() {
        "RSA" => {
            let key = DecodingKey::from_rsa_components(jwk.n.as_deref()?, jwk.e.as_deref()?).ok()?;
            Some(CachedKey {
                key,
                algorithm: Algorithm::RS256,
            })
        }
        "OKP" => {
            let key = DecodingKey::from_ed_components(jwk.x.as_deref()?).ok()?;
            Some(CachedKey {
                key,
                algorithm: Algorithm::EdDSA,
            })
        }
        _ => None,
    }
}
