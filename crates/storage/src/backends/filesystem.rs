//! Local filesystem storage backend.
//!
//! Uploads are regular files under `<root>/uploads/<uuid>`; promotion is an
//! atomic rename to `<root>/blobs/sha256/<xx>/<digest>`. The rename is the
//! ordering primitive for concurrent promotions of one digest.

use crate::error::{StorageError, StorageResult};
use crate::keys::{blob_object_key, manifest_object_key, upload_object_key};
use crate::traits::{BlobStore, ByteStream};
use async_trait::async_trait;
use berth_core::DigestHasher;
use bytes::Bytes;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;
use uuid::Uuid;

/// Chunk size for streaming blob reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Local filesystem blob store.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn upload_path(&self, upload_id: &str) -> PathBuf {
        self.root.join(upload_object_key(upload_id))
    }

    fn blob_path(&self, digest_hex: &str) -> PathBuf {
        self.root.join(blob_object_key(digest_hex))
    }

    fn manifest_path(&self, repo: &str, reference: &str) -> StorageResult<PathBuf> {
        let key = manifest_object_key(repo, reference);
        if key.split('/').any(|part| part.is_empty() || part == "..") {
            return Err(StorageError::InvalidKey(key));
        }
        Ok(self.root.join(key))
    }

    /// Write `data` to `path` via a unique temp file and rename, so readers
    /// never observe a partial write.
    async fn write_file_atomically(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp_path = path.with_file_name(format!(".tmp.{}", Uuid::new_v4()));
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
        }
        fs::rename(&temp_path, path).await?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn init(&self) -> StorageResult<()> {
        for dir in ["blobs/sha256", "uploads", "repositories"] {
            fs::create_dir_all(self.root.join(dir)).await?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn create_upload(&self, upload_id: &str) -> StorageResult<()> {
        let path = self.upload_path(upload_id);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StorageError::AlreadyExists(upload_id.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self, body), fields(backend = "filesystem"))]
    async fn append_upload(&self, upload_id: &str, mut body: ByteStream) -> StorageResult<i64> {
        let path = self.upload_path(upload_id);
        let mut file = match fs::OpenOptions::new().append(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::UploadNotFound(upload_id.to_string()));
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        while let Some(chunk) = body.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;

        let metadata = file.metadata().await?;
        Ok(metadata.len() as i64)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn upload_digest(&self, upload_id: &str) -> StorageResult<String> {
        let path = self.upload_path(upload_id);
        let mut file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::UploadNotFound(upload_id.to_string()));
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        let mut hasher = DigestHasher::default();
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize().hex().to_string())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete_upload(&self, upload_id: &str) -> StorageResult<()> {
        match fs::remove_file(self.upload_path(upload_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn blob_exists(&self, digest_hex: &str) -> StorageResult<bool> {
        fs::try_exists(self.blob_path(digest_hex))
            .await
            .map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn blob_size(&self, digest_hex: &str) -> StorageResult<i64> {
        match fs::metadata(self.blob_path(digest_hex)).await {
            Ok(metadata) => Ok(metadata.len() as i64),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::BlobNotFound(digest_hex.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_blob(&self, digest_hex: &str) -> StorageResult<(ByteStream, i64)> {
        let path = self.blob_path(digest_hex);
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::BlobNotFound(digest_hex.to_string()));
            }
            Err(e) => return Err(StorageError::Io(e)),
        };
        let size = file.metadata().await?.len() as i64;

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok((Box::pin(stream), size))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn store_blob_from_upload(&self, upload_id: &str, digest_hex: &str) -> StorageResult<()> {
        let src = self.upload_path(upload_id);
        match fs::try_exists(&src).await {
            Ok(true) => {}
            Ok(false) => return Err(StorageError::UploadNotFound(upload_id.to_string())),
            Err(e) => return Err(StorageError::Io(e)),
        }

        let dst = self.blob_path(digest_hex);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Another promotion of the same digest already landed; the bytes are
        // identical by content addressing, so just drop this upload.
        if fs::try_exists(&dst).await.map_err(StorageError::Io)? {
            return self.delete_upload(upload_id).await;
        }

        match fs::rename(&src, &dst).await {
            Ok(()) => Ok(()),
            Err(_) => {
                // Rename across devices fails; fall back to copy + unlink.
                // O_EXCL keeps concurrent losers from clobbering the winner.
                let mut reader = fs::File::open(&src).await?;
                let mut writer = match fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&dst)
                    .await
                {
                    Ok(writer) => writer,
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                        return self.delete_upload(upload_id).await;
                    }
                    Err(e) => return Err(StorageError::Io(e)),
                };
                tokio::io::copy(&mut reader, &mut writer).await?;
                writer.sync_all().await?;
                drop(writer);
                fs::remove_file(&src).await?;
                Ok(())
            }
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete_blob(&self, digest_hex: &str) -> StorageResult<()> {
        match fs::remove_file(self.blob_path(digest_hex)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self, manifest), fields(backend = "filesystem", size = manifest.len()))]
    async fn store_manifest(
        &self,
        repo: &str,
        reference: &str,
        manifest: &[u8],
        content_type: &str,
    ) -> StorageResult<()> {
        let path = self.manifest_path(repo, reference)?;
        self.write_file_atomically(&path, manifest).await?;

        let content_type_path = path.with_extension("json.content-type");
        let normalized = berth_core::manifest::manifest_content_type(content_type);
        self.write_file_atomically(&content_type_path, format!("{normalized}\n").as_bytes())
            .await
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_manifest(&self, repo: &str, reference: &str) -> StorageResult<(Vec<u8>, String)> {
        let path = self.manifest_path(repo, reference)?;
        let manifest = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::ManifestNotFound(format!("{repo}:{reference}")));
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        let content_type_path = path.with_extension("json.content-type");
        let content_type = match fs::read_to_string(&content_type_path).await {
            Ok(data) => berth_core::manifest::manifest_content_type(data.trim()).to_string(),
            Err(_) => berth_core::DEFAULT_MANIFEST_CONTENT_TYPE.to_string(),
        };

        Ok((manifest, content_type))
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;
        if !metadata.is_dir() {
            return Err(StorageError::Config(format!(
                "storage root is not a directory: {:?}",
                self.root
            )));
        }
        Ok(())
    }
}
