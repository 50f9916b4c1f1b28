//! API key repository.

use crate::error::MetadataResult;
use crate::models::ApiKeyWithScopes;
use async_trait::async_trait;
use uuid::Uuid;

/// One scope to attach to a new API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddApiKeyScope {
    pub registry_id: Uuid,
    pub repository_id: Option<Uuid>,
    pub permission: berth_core::Permission,
}

/// Arguments for creating an API key with its scopes.
#[derive(Debug, Clone)]
pub struct AddApiKeyArgs {
    pub user_id: Uuid,
    pub key_name: String,
    pub secret_encrypted: String,
    pub prefix: String,
    pub scopes: Vec<AddApiKeyScope>,
}

/// Repository for API keys and their scopes.
#[async_trait]
pub trait ApiKeyRepo: Send + Sync {
    /// Create a key and its scopes in one transaction. Duplicate scope
    /// targets (same registry and repository) fail with `ScopeConflict`;
    /// a taken key name for the user fails with `Conflict`.
    async fn add_api_key(&self, args: &AddApiKeyArgs) -> MetadataResult<ApiKeyWithScopes>;

    /// List a user's keys, newest first, with scopes (repository leaf
    /// names resolved).
    async fn list_api_keys_by_user(&self, user_id: Uuid) -> MetadataResult<Vec<ApiKeyWithScopes>>;

    /// List every key owned by a user of the given organization. This is
    /// the Basic-auth lookup path for the token endpoint.
    async fn list_api_keys_for_org(&self, org_id: Uuid) -> MetadataResult<Vec<ApiKeyWithScopes>>;

    /// Delete a key owned by the user. `NotFound` when no row matches.
    async fn remove_api_key(&self, user_id: Uuid, id: Uuid) -> MetadataResult<()>;

    /// Record key usage.
    async fn touch_api_key_last_used(&self, id: Uuid) -> MetadataResult<()>;
}
