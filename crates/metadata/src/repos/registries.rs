//! Registry repository, including the referenced-bytes size cache.

use crate::error::MetadataResult;
use crate::models::{ApiKeyWithScopes, RegistryRow};
use async_trait::async_trait;
use uuid::Uuid;

/// Arguments for creating a registry together with its default API key.
#[derive(Debug, Clone)]
pub struct AddRegistryWithKeyArgs {
    pub org_id: Uuid,
    pub name: String,
    pub user_id: Uuid,
    pub key_name: String,
    pub secret_encrypted: String,
    pub prefix: String,
}

/// Repository for registry (tenant namespace) operations.
#[async_trait]
pub trait RegistryRepo: Send + Sync {
    /// Create a registry and a default registry-wide admin API key in one
    /// transaction. Fails with `Conflict` when the name is taken.
    async fn add_registry_with_key(
        &self,
        args: &AddRegistryWithKeyArgs,
    ) -> MetadataResult<(RegistryRow, ApiKeyWithScopes)>;

    /// Get a registry by id.
    async fn get_registry_by_id(&self, id: Uuid) -> MetadataResult<Option<RegistryRow>>;

    /// Get a registry by its globally unique name.
    async fn get_registry_by_name(&self, name: &str) -> MetadataResult<Option<RegistryRow>>;

    /// List registries owned by an organization, by name.
    async fn list_registries_by_org(&self, org_id: Uuid) -> MetadataResult<Vec<RegistryRow>>;

    /// Referenced-bytes total for a registry with bounded staleness.
    ///
    /// Returns the cached value when it is younger than `max_age`
    /// (non-positive `max_age` defaults to 60 seconds); otherwise
    /// recomputes inside a transaction that locks the registry row, so
    /// concurrent recomputes for one registry serialize.
    async fn get_registry_referenced_bytes_cached(
        &self,
        registry_id: Uuid,
        max_age: time::Duration,
    ) -> MetadataResult<i64>;
}
