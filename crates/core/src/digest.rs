//! Content digest types and utilities.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

const DIGEST_PREFIX: &str = "sha256:";
const HEX_LEN: usize = 64;

/// A canonical `sha256:<64 lowercase hex>` content address.
///
/// The hex portion is always stored lowercase; parsing accepts either case.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Parse a full digest string of the form `sha256:<64 hex>`.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let hex = s
            .strip_prefix(DIGEST_PREFIX)
            .ok_or_else(|| crate::Error::InvalidDigest("digest must be sha256:<64-hex>".into()))?;
        Self::from_hex(hex)
    }

    /// Build a digest from its 64-character hex portion.
    pub fn from_hex(hex: &str) -> crate::Result<Self> {
        if hex.len() != HEX_LEN || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(crate::Error::InvalidDigest(
                "digest must be sha256:<64-hex>".into(),
            ));
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// Compute the digest of a byte slice.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hex::encode(hasher.finalize()))
    }

    /// Create an incremental hasher.
    pub fn hasher() -> DigestHasher {
        DigestHasher(Sha256::new())
    }

    /// The lowercase hex portion without the `sha256:` prefix.
    pub fn hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.0[..16])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{DIGEST_PREFIX}{}", self.0)
    }
}

/// Incremental SHA-256 hasher producing a [`Digest`].
pub struct DigestHasher(Sha256);

impl DigestHasher {
    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the digest.
    pub fn finalize(self) -> Digest {
        Digest(hex::encode(self.0.finalize()))
    }
}

impl Default for DigestHasher {
    fn default() -> Self {
        Digest::hasher()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        let digest = Digest::compute(b"hello world");
        let parsed = Digest::parse(&digest.to_string()).unwrap();
        assert_eq!(digest, parsed);
        assert_eq!(digest.hex().len(), 64);
    }

    #[test]
    fn test_parse_canonicalizes_case() {
        let upper = format!("sha256:{}", "A".repeat(64));
        let digest = Digest::parse(&upper).unwrap();
        assert_eq!(digest.hex(), "a".repeat(64));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Digest::parse("sha256:short").is_err());
        assert!(Digest::parse(&"a".repeat(64)).is_err());
        assert!(Digest::parse(&format!("sha512:{}", "a".repeat(64))).is_err());
        assert!(Digest::parse(&format!("sha256:{}zz", "a".repeat(62))).is_err());
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let mut hasher = Digest::hasher();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), Digest::compute(b"hello world"));
    }
}
