//! EdDSA registry token issuance and verification.

use crate::error::{TokenError, TokenResult};
use crate::keys::RegistryKeyPair;
use berth_core::access::RepositoryAccess;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Registry token lifetime.
pub const TOKEN_TTL: time::Duration = time::Duration::minutes(30);

/// Clock-skew leeway applied on both issue (`nbf`) and verification.
pub const TOKEN_LEEWAY_SECS: u64 = 30;

/// Claims carried by a registry bearer token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access: Vec<RepositoryAccess>,
    pub iss: String,
    pub sub: String,
    pub aud: Vec<String>,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
}

/// Signs and verifies registry bearer tokens with the service key pair.
/// Shared read-only across request handlers after startup.
pub struct TokenAuthority {
    keypair: RegistryKeyPair,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenAuthority {
    pub fn new(keypair: RegistryKeyPair) -> TokenResult<Self> {
        let encoding_key = EncodingKey::from_ed_pem(keypair.private_pem().as_bytes())
            .map_err(|e| TokenError::KeyParsing(format!("private key rejected: {e}")))?;
        let decoding_key = DecodingKey::from_ed_pem(keypair.public_pem().as_bytes())
            .map_err(|e| TokenError::KeyParsing(format!("public key rejected: {e}")))?;
        Ok(Self {
            keypair,
            encoding_key,
            decoding_key,
        })
    }

    /// The underlying key pair (for JWKS publication).
    pub fn keypair(&self) -> &RegistryKeyPair {
        &self.keypair
    }

    /// Issue a token for `namespace` bound to `service` with the granted
    /// access list. Returns `(token, issued_at, expires_at)`.
    pub fn issue(
        &self,
        namespace: &str,
        service: &str,
        access: Vec<RepositoryAccess>,
    ) -> TokenResult<(String, OffsetDateTime, OffsetDateTime)> {
        let issued_at = OffsetDateTime::now_utc();
        let expires_at = issued_at + TOKEN_TTL;

        let claims = Claims {
            access,
            iss: service.to_string(),
            sub: namespace.to_string(),
            aud: vec![service.to_string()],
            iat: issued_at.unix_timestamp(),
            nbf: issued_at.unix_timestamp() - TOKEN_LEEWAY_SECS as i64,
            exp: expires_at.unix_timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::EdDSA), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        Ok((token, issued_at, expires_at))
    }

    /// Verify a token: EdDSA only, audience contains `service`, issuer
    /// equals `service`, 30-second leeway, non-empty subject.
    pub fn verify(&self, token: &str, service: &str) -> TokenResult<Claims> {
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.leeway = TOKEN_LEEWAY_SECS;
        validation.validate_nbf = true;
        if service.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&[service]);
            validation.set_issuer(&[service]);
        }

        let data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| TokenError::Verification(e.to_string()))?;

        if data.claims.sub.trim().is_empty() {
            return Err(TokenError::Verification("token subject missing".into()));
        }
        Ok(data.claims)
    }
}
