//! API key material, permission levels, and secret encryption.
//!
//! Key format: `sk_<16 hex prefix>_<52-char base32 secret>`. The prefix is
//! plaintext and indexed; the full key is AES-256-GCM encrypted with a
//! service-wide key so it can be returned to its owner on listing.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use data_encoding::BASE32_NOPAD;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

const PREFIX_BYTES: usize = 8;
const SECRET_BYTES: usize = 32;
const NONCE_LEN: usize = 12;

/// Permission level carried by an API key scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Admin,
}

impl Permission {
    /// Parse from the wire representation.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s.trim() {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "admin" => Ok(Self::Admin),
            other => Err(crate::Error::InvalidApiKey(format!(
                "permission must be read, write, or admin (got {other:?})"
            ))),
        }
    }

    /// The wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }

    /// Whether this permission level grants the requested registry action.
    /// Admin grants the same token-level access as write (pull + push); it
    /// is reserved for future privileged operations that sit outside the
    /// token scope.
    pub fn allows(&self, action: &str) -> bool {
        match action {
            "pull" => true,
            "push" => matches!(self, Self::Write | Self::Admin),
            _ => false,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Generate a new random API key. Returns `(full_key, prefix)`.
pub fn generate_api_key() -> (String, String) {
    let mut prefix_bytes = [0u8; PREFIX_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut prefix_bytes);
    let mut secret_bytes = [0u8; SECRET_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut secret_bytes);

    let prefix = hex::encode(prefix_bytes);
    let secret = BASE32_NOPAD.encode(&secret_bytes);
    (format!("sk_{prefix}_{secret}"), prefix)
}

/// Extract the prefix segment from a well-formed API key string.
pub fn parse_api_key_prefix(key: &str) -> crate::Result<&str> {
    let rest = key
        .strip_prefix("sk_")
        .ok_or_else(|| crate::Error::InvalidApiKey("invalid API key format".into()))?;
    let (prefix, secret) = rest
        .split_once('_')
        .ok_or_else(|| crate::Error::InvalidApiKey("invalid API key format".into()))?;
    let prefix_ok = prefix.len() == PREFIX_BYTES * 2
        && prefix
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    let secret_ok = !secret.is_empty()
        && secret
            .bytes()
            .all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b));
    if !prefix_ok || !secret_ok {
        return Err(crate::Error::InvalidApiKey("invalid API key format".into()));
    }
    Ok(prefix)
}

/// AES-256-GCM cipher for API key secrets, keyed by the service-wide key.
#[derive(Clone)]
pub struct ApiKeyCipher {
    cipher: Aes256Gcm,
}

impl ApiKeyCipher {
    /// Build from a 64-character hex string (32 bytes).
    pub fn from_hex(key_hex: &str) -> crate::Result<Self> {
        let bytes = hex::decode(key_hex.trim())
            .map_err(|_| crate::Error::Config("API key encryption key must be hex".into()))?;
        if bytes.len() != 32 {
            return Err(crate::Error::Config(
                "API key encryption key must be a 64-char hex string (32 bytes)".into(),
            ));
        }
        let cipher = Aes256Gcm::new_from_slice(&bytes)
            .map_err(|e| crate::Error::Config(format!("invalid AES key: {e}")))?;
        Ok(Self { cipher })
    }

    /// Encrypt a full API key string. Output is `base64(nonce || ciphertext)`.
    pub fn encrypt(&self, full_key: &str) -> crate::Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, full_key.as_bytes())
            .map_err(|e| crate::Error::Crypto(format!("encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    /// Decrypt a value produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, encrypted: &str) -> crate::Result<String> {
        let data = BASE64
            .decode(encrypted)
            .map_err(|e| crate::Error::Crypto(format!("invalid base64: {e}")))?;
        if data.len() < NONCE_LEN {
            return Err(crate::Error::Crypto("ciphertext too short".into()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| crate::Error::Crypto(format!("decryption failed: {e}")))?;
        String::from_utf8(plaintext).map_err(|_| crate::Error::Crypto("invalid UTF-8".into()))
    }
}

impl fmt::Debug for ApiKeyCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKeyCipher([REDACTED])")
    }
}

/// Constant-time comparison of the provided key against the decrypted
/// stored key, preventing timing attacks.
pub fn matches_api_key(provided: &str, decrypted: &str) -> bool {
    provided.as_bytes().ct_eq(decrypted.as_bytes()).into()
}
