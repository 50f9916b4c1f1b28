//! Manifest index repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use uuid::Uuid;

/// Arguments for the atomic manifest index upsert.
#[derive(Debug, Clone)]
pub struct UpsertManifestIndexArgs {
    pub registry_id: Uuid,
    /// Repository leaf name (namespace prefix stripped).
    pub repository: String,
    /// Full `sha256:<hex>` manifest digest.
    pub manifest_digest: String,
    pub manifest_body: Vec<u8>,
    pub content_type: String,
    /// Reference strings to point at this manifest (tag and/or digest).
    pub references: Vec<String>,
    /// Full `sha256:<hex>` digests of the blobs this manifest depends on.
    pub blob_digests: Vec<String>,
}

/// Repository for the transactional `(repository, reference) → manifest`
/// table of record.
#[async_trait]
pub trait ManifestIndexRepo: Send + Sync {
    /// Insert a blob row, or refresh `last_seen_at` (and size) when the
    /// digest is already known.
    async fn upsert_blob(&self, digest: &str, size_bytes: i64) -> MetadataResult<()>;

    /// Atomically: ensure the repository row (bumping `last_pushed_at`),
    /// upsert the manifest body, record the manifest→blob dependencies,
    /// and swap every reference pointer. On failure the index is
    /// unchanged. The caller must have verified that every referenced
    /// blob exists in the blob store; the index does not re-verify.
    async fn upsert_manifest_index(&self, args: &UpsertManifestIndexArgs) -> MetadataResult<()>;

    /// Resolve a reference to `(body, content_type, digest)`.
    async fn get_manifest_by_reference(
        &self,
        registry_id: Uuid,
        repository: &str,
        reference: &str,
    ) -> MetadataResult<Option<(Vec<u8>, String, String)>>;
}
