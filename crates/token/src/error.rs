//! Token authority error types.

use thiserror::Error;

/// Token authority errors.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("key parsing error: {0}")]
    KeyParsing(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("verification error: {0}")]
    Verification(String),
}

/// Result type for token operations.
pub type TokenResult<T> = std::result::Result<T, TokenError>;
