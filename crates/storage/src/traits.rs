//! Blob store trait definition.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// A boxed stream of bytes for streaming request and response bodies.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Durable, content-addressed blob storage with resumable chunked ingest.
///
/// Digests are always the 64-char lowercase hex portion (without the
/// `sha256:` prefix). Upload ids are caller-supplied UUIDs; appends to one
/// upload id are serial, concurrent appends are undefined.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Prepare the backend (create directories, etc.). Called once at startup.
    async fn init(&self) -> StorageResult<()>;

    /// Reserve an empty staging slot. Fails with `AlreadyExists` if the id
    /// is already in use.
    async fn create_upload(&self, upload_id: &str) -> StorageResult<()>;

    /// Atomically extend the staging slot with the streamed body, returning
    /// the new total size. The body is never buffered in full.
    async fn append_upload(&self, upload_id: &str, body: ByteStream) -> StorageResult<i64>;

    /// Hash the current upload contents, returning lowercase hex.
    async fn upload_digest(&self, upload_id: &str) -> StorageResult<String>;

    /// Remove a staging slot. Removing an absent slot is not an error.
    async fn delete_upload(&self, upload_id: &str) -> StorageResult<()>;

    /// Check whether a blob exists at its canonical key.
    async fn blob_exists(&self, digest_hex: &str) -> StorageResult<bool>;

    /// Size in bytes of a stored blob.
    async fn blob_size(&self, digest_hex: &str) -> StorageResult<i64>;

    /// Stream a blob's content. The caller drives (and thereby closes) the
    /// stream.
    async fn get_blob(&self, digest_hex: &str) -> StorageResult<(ByteStream, i64)>;

    /// Atomically promote a staging slot to the canonical blob key.
    /// Safe under concurrent promotions of one digest: the first completed
    /// promotion wins and later callers merely drop their upload.
    async fn store_blob_from_upload(&self, upload_id: &str, digest_hex: &str) -> StorageResult<()>;

    /// Remove a blob object. GC-only.
    async fn delete_blob(&self, digest_hex: &str) -> StorageResult<()>;

    /// Fallback manifest persistence for database-less deployments. The
    /// preferred deployment keeps manifests in the metadata store and never
    /// calls these.
    async fn store_manifest(
        &self,
        repo: &str,
        reference: &str,
        manifest: &[u8],
        content_type: &str,
    ) -> StorageResult<()>;

    /// Fetch a manifest stored via [`store_manifest`](Self::store_manifest).
    /// Returns `(bytes, content_type)`.
    async fn get_manifest(&self, repo: &str, reference: &str) -> StorageResult<(Vec<u8>, String)>;

    /// Static identifier for the backend type, used in logging.
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is reachable before accepting requests.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
