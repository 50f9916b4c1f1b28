//! Garbage collection index.
//!
//! The sweep itself is an external loop: it lists unreferenced digests,
//! deletes the rows here, then best-effort deletes the objects in the blob
//! store. The index only guarantees snapshot correctness of the listing at
//! the moment the query returned.

use crate::error::MetadataResult;
use async_trait::async_trait;

/// Repository for the reference-counted GC index.
#[async_trait]
pub trait GcRepo: Send + Sync {
    /// Digests of blobs with no live manifest reference, oldest
    /// `last_seen_at` first. A non-positive limit defaults to 100.
    async fn list_unreferenced_blob_digests(&self, limit: i64) -> MetadataResult<Vec<String>>;

    /// Remove a blob row. The caller deletes the stored object.
    async fn delete_blob(&self, digest: &str) -> MetadataResult<()>;
}
