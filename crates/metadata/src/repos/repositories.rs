//! Repository-table operations.

use crate::error::MetadataResult;
use crate::models::RepositoryRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for repository rows within a registry.
#[async_trait]
pub trait RepositoryRepo: Send + Sync {
    /// Upsert a repository row; idempotent.
    async fn ensure_repository(
        &self,
        registry_id: Uuid,
        name: &str,
    ) -> MetadataResult<RepositoryRow>;

    /// Upsert a repository row, bumping `last_pushed_at`.
    async fn touch_repository_push(
        &self,
        registry_id: Uuid,
        name: &str,
    ) -> MetadataResult<RepositoryRow>;

    /// List repositories of a registry, most recently pushed first, with
    /// the most recently updated non-digest reference as `last_tag`.
    async fn list_repositories_by_registry(
        &self,
        registry_id: Uuid,
    ) -> MetadataResult<Vec<RepositoryRow>>;
}
