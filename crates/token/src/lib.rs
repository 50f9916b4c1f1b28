//! Registry token authority for Berth.
//!
//! Converts a Basic-authenticated API-key credential into a short-lived,
//! scope-bounded EdDSA bearer token, verifies inbound tokens, and
//! publishes the verification key as a JWKS document.

pub mod authority;
pub mod error;
pub mod keys;

pub use authority::{Claims, TOKEN_LEEWAY_SECS, TOKEN_TTL, TokenAuthority};
pub use error::{TokenError, TokenResult};
pub use keys::{Jwk, JwkSet, RegistryKeyPair};
