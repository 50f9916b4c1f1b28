//! Application state shared across handlers.

use crate::session::SessionVerifier;
use berth_core::ApiKeyCipher;
use berth_metadata::MetadataStore;
use berth_storage::BlobStore;
use berth_token::TokenAuthority;
use std::sync::Arc;

/// Shared application state. Everything here is read-only after startup
/// except the session verifier's JWKS cache.
#[derive(Clone)]
pub struct AppState {
    /// Object storage backend for blobs and staged uploads.
    pub storage: Arc<dyn BlobStore>,
    /// Metadata store (registries, manifest index, API keys, GC index).
    pub metadata: Arc<dyn MetadataStore>,
    /// Registry token signer/verifier.
    pub authority: Arc<TokenAuthority>,
    /// AES-256-GCM cipher for API key secrets.
    pub api_keys: ApiKeyCipher,
    /// Management-session JWT verifier.
    pub sessions: Arc<SessionVerifier>,
    /// Service name used as token issuer/audience; falls back to the
    /// request Host header when unset.
    pub service: Option<String>,
}

impl AppState {
    pub fn new(
        storage: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        authority: TokenAuthority,
        api_keys: ApiKeyCipher,
        sessions: SessionVerifier,
        service: Option<String>,
    ) -> Self {
        Self {
            storage,
            metadata,
            authority: Arc::new(authority),
            api_keys,
            sessions: Arc::new(sessions),
            service,
        }
    }
}
