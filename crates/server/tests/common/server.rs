//! Server test harness.

use crate::common::memory::MemoryMetadata;
use berth_core::ApiKeyCipher;
use berth_server::{AppState, SessionVerifier, create_router};
use berth_storage::{BlobStore, FilesystemBackend};
use berth_token::{RegistryKeyPair, TokenAuthority};
use std::sync::Arc;
use tempfile::TempDir;

/// Deterministic 32-byte API key encryption key for tests.
pub const TEST_ENCRYPTION_KEY: &str =
    "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

/// The service name tests mint and verify tokens against.
pub const TEST_SERVICE: &str = "registry.test";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub metadata: Arc<MemoryMetadata>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server with filesystem storage in a temp dir, the
    /// in-memory metadata store, and a fresh Ed25519 key pair.
    pub async fn new() -> Self {
        Self::with_jwks_url("http://127.0.0.1:1/jwks.json").await
    }

    /// Same, pointing the session verifier at a specific JWKS endpoint
    /// (e.g. an httpmock server) for management-surface tests.
    pub async fn with_jwks_url(jwks_url: &str) -> Self {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");

        let storage: Arc<dyn BlobStore> =
            Arc::new(FilesystemBackend::new(temp_dir.path().join("storage")));
        storage.init().await.expect("failed to init storage");

        let metadata = Arc::new(MemoryMetadata::new());

        let authority = TokenAuthority::new(RegistryKeyPair::generate())
            .expect("failed to build token authority");
        let api_keys =
            ApiKeyCipher::from_hex(TEST_ENCRYPTION_KEY).expect("failed to build cipher");
        let sessions = SessionVerifier::new(jwks_url);

        let state = AppState::new(
            storage,
            metadata.clone(),
            authority,
            api_keys,
            sessions,
            Some(TEST_SERVICE.to_string()),
        );
        let router = create_router(state.clone());

        Self {
            router,
            state,
            metadata,
            _temp_dir: temp_dir,
        }
    }

    pub fn cipher(&self) -> &ApiKeyCipher {
        &self.state.api_keys
    }
}
