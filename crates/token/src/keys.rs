//! Ed25519 registry signing keys.
//!
//! The private key arrives as PKCS#8 PEM; the public key is either parsed
//! from PKIX PEM or derived. The key id is the base64url-encoded SHA-256 of
//! the DER-encoded public key, which is what the JWKS document advertises.

use crate::error::{TokenError, TokenResult};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// A JSON Web Key for an Ed25519 verification key.
#[derive(Clone, Debug, Serialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub kid: String,
    pub alg: String,
    pub crv: String,
    pub x: String,
}

/// A JWKS document with the registry's single signing key.
#[derive(Clone, Debug, Serialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// The registry's Ed25519 key pair, kept in PEM form for the JWT layer.
pub struct RegistryKeyPair {
    private_pem: String,
    public_pem: String,
    verifying: VerifyingKey,
    kid: String,
}

impl RegistryKeyPair {
    /// Load from a PKCS#8 private key PEM and an optional PKIX public key
    /// PEM. The public key is derived from the private key when absent.
    pub fn from_pem(private_pem: &str, public_pem: Option<&str>) -> TokenResult<Self> {
        let signing = SigningKey::from_pkcs8_pem(private_pem.trim())
            .map_err(|e| TokenError::KeyParsing(format!("could not parse PKCS8 private key: {e}")))?;

        let verifying = match public_pem {
            Some(pem) => VerifyingKey::from_public_key_pem(pem.trim()).map_err(|e| {
                TokenError::KeyParsing(format!("could not parse PKIX public key: {e}"))
            })?,
            None => signing.verifying_key(),
        };

        let public_pem = verifying
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| TokenError::KeyParsing(format!("could not encode public key: {e}")))?;

        let kid = key_id(&verifying)?;

        Ok(Self {
            private_pem: private_pem.trim().to_string(),
            public_pem,
            verifying,
            kid,
        })
    }

    /// Generate an ephemeral key pair. Suitable for development and tests.
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut rand::rngs::OsRng);
        let private_pem = signing
            .to_pkcs8_pem(LineEnding::LF)
            .expect("fresh key always encodes");
        Self::from_pem(&private_pem, None).expect("fresh key always parses")
    }

    /// The PKCS#8 private key PEM.
    pub fn private_pem(&self) -> &str {
        &self.private_pem
    }

    /// The PKIX public key PEM.
    pub fn public_pem(&self) -> &str {
        &self.public_pem
    }

    /// Key id: base64url(sha256(DER-encoded public key)).
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// The public key as a JWK.
    pub fn jwk(&self) -> Jwk {
        Jwk {
            kty: "OKP".to_string(),
            use_: "sig".to_string(),
            kid: self.kid.clone(),
            alg: "EdDSA".to_string(),
            crv: "Ed25519".to_string(),
            x: URL_SAFE_NO_PAD.encode(self.verifying.to_bytes()),
        }
    }

    /// The JWKS document published at `/.well-known/jwks.json`.
    pub fn jwks(&self) -> JwkSet {
        JwkSet {
            keys: vec![self.jwk()],
        }
    }
}

impl fmt::Debug for RegistryKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryKeyPair")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

fn key_id(verifying: &VerifyingKey) -> TokenResult<String> {
    let der = verifying
        .to_public_key_der()
        .map_err(|e| TokenError::KeyParsing(format!("could not encode public key DER: {e}")))?;
    let sum = Sha256::digest(der.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(sum))
}
