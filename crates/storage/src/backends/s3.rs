//! S3-compatible storage backend (Cloudflare R2 and friends).
//!
//! In-progress uploads stay on local disk, where streaming appends are
//! cheap; promotion uploads the finished file to the bucket with a
//! multipart upload. Existence is probed with HeadObject.

use crate::error::{StorageError, StorageResult};
use crate::keys::{blob_object_key, manifest_object_key};
use crate::traits::{BlobStore, ByteStream};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use berth_core::DigestHasher;
use bytes::Bytes;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::instrument;

/// Part size for multipart promotions (8 MiB; S3 requires >= 5 MiB for all
/// parts except the last).
const PART_SIZE: usize = 8 * 1024 * 1024;

/// S3-compatible blob store with local upload staging.
pub struct S3Backend {
    client: Client,
    bucket: String,
    upload_dir: PathBuf,
}

impl S3Backend {
    /// Create a new backend. Credentials are static; addressing is
    /// path-style, which R2 and MinIO require.
    pub fn new(
        bucket: &str,
        endpoint: &str,
        region: &str,
        access_key_id: &str,
        secret_access_key: &str,
        data_dir: impl AsRef<Path>,
    ) -> Self {
        let credentials = aws_sdk_s3::config::Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            "berth-config",
        );
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(config),
            bucket: bucket.to_string(),
            upload_dir: data_dir.as_ref().join("uploads"),
        }
    }

    fn upload_path(&self, upload_id: &str) -> PathBuf {
        self.upload_dir.join(upload_id)
    }

    /// Map an SDK error, turning 404-class responses into `BlobNotFound`.
    fn map_sdk_error<E>(err: aws_sdk_s3::error::SdkError<E>, digest_hex: &str) -> StorageError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if is_not_found(&err) {
            StorageError::BlobNotFound(digest_hex.to_string())
        } else {
            StorageError::S3(Box::new(err))
        }
    }

    async fn promote_multipart(&self, key: &str, path: &Path, size: u64) -> StorageResult<()> {
        let create_output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(berth_core::DEFAULT_BLOB_CONTENT_TYPE)
            .send()
            .await
            .map_err(|e| StorageError::S3(Box::new(e)))?;
        let multipart_id = create_output
            .upload_id()
            .ok_or_else(|| StorageError::Config("S3 did not return an upload id".to_string()))?
            .to_string();

        let result = self.upload_parts(key, &multipart_id, path, size).await;
        if result.is_err() {
            // Best-effort abort so orphaned parts don't accumulate.
            let _ = self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&multipart_id)
                .send()
                .await;
        }
        result
    }

    async fn upload_parts(
        &self,
        key: &str,
        multipart_id: &str,
        path: &Path,
        size: u64,
    ) -> StorageResult<()> {
        let mut file = fs::File::open(path).await?;
        let mut parts = Vec::new();
        let mut part_number = 1i32;
        let mut remaining = size;

        while remaining > 0 {
            let this_part = remaining.min(PART_SIZE as u64) as usize;
            let mut buf = vec![0u8; this_part];
            file.read_exact(&mut buf).await?;
            remaining -= this_part as u64;

            let upload_output = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(multipart_id)
                .part_number(part_number)
                .body(Bytes::from(buf).into())
                .send()
                .await
                .map_err(|e| StorageError::S3(Box::new(e)))?;

            parts.push(
                aws_sdk_s3::types::CompletedPart::builder()
                    .e_tag(upload_output.e_tag().unwrap_or_default())
                    .part_number(part_number)
                    .build(),
            );
            part_number += 1;
        }

        let completed = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(multipart_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| StorageError::S3(Box::new(e)))?;
        Ok(())
    }
}

fn is_not_found<E>(err: &aws_sdk_s3::error::SdkError<E>) -> bool {
    if let aws_sdk_s3::error::SdkError::ServiceError(service_err) = err {
        return service_err.raw().status().as_u16() == 404;
    }
    false
}

#[async_trait]
impl BlobStore for S3Backend {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn init(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.upload_dir).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn create_upload(&self, upload_id: &str) -> StorageResult<()> {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.upload_path(upload_id))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StorageError::AlreadyExists(upload_id.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self, body), fields(backend = "s3"))]
    async fn append_upload(&self, upload_id: &str, mut body: ByteStream) -> StorageResult<i64> {
        let mut file = match fs::OpenOptions::new()
            .append(true)
            .open(self.upload_path(upload_id))
            .await
        {
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
        Ok(file.metadata().await?.len() as i64)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn upload_digest(&self, upload_id: &str) -> StorageResult<String> {
        let mut file = match fs::File::open(self.upload_path(upload_id)).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::UploadNotFound(upload_id.to_string()));
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        let mut hasher = DigestHasher::default();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize().hex().to_string())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete_upload(&self, upload_id: &str) -> StorageResult<()> {
        match fs::remove_file(self.upload_path(upload_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn blob_exists(&self, digest_hex: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(blob_object_key(digest_hex))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(StorageError::S3(Box::new(err))),
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn blob_size(&self, digest_hex: &str) -> StorageResult<i64> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(blob_object_key(digest_hex))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, digest_hex))?;
        output
            .content_length()
            .ok_or_else(|| StorageError::Config(format!("missing content length for blob {digest_hex}")))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get_blob(&self, digest_hex: &str) -> StorageResult<(ByteStream, i64)> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(blob_object_key(digest_hex))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, digest_hex))?;

        let size = output.content_length().unwrap_or(-1);
        let reader = ReaderStream::new(output.body.into_async_read());
        Ok((Box::pin(reader), size))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn store_blob_from_upload(&self, upload_id: &str, digest_hex: &str) -> StorageResult<()> {
        if self.blob_exists(digest_hex).await? {
            return self.delete_upload(upload_id).await;
        }

        let path = self.upload_path(upload_id);
        let size = match fs::metadata(&path).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::UploadNotFound(upload_id.to_string()));
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        let key = blob_object_key(digest_hex);
        if size < PART_SIZE as u64 {
            let body = aws_sdk_s3::primitives::ByteStream::from_path(&path)
                .await
                .map_err(|e| StorageError::S3(Box::new(e)))?;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .content_type(berth_core::DEFAULT_BLOB_CONTENT_TYPE)
                .body(body)
                .send()
                .await
                .map_err(|e| StorageError::S3(Box::new(e)))?;
        } else {
            self.promote_multipart(&key, &path, size).await?;
        }

        self.delete_upload(upload_id).await
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete_blob(&self, digest_hex: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(blob_object_key(digest_hex))
            .send()
            .await
            .map_err(|e| StorageError::S3(Box::new(e)))?;
        Ok(())
    }

    #[instrument(skip(self, manifest), fields(backend = "s3", size = manifest.len()))]
    async fn store_manifest(
        &self,
        repo: &str,
        reference: &str,
        manifest: &[u8],
        content_type: &str,
    ) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(manifest_object_key(repo, reference))
            .content_type(berth_core::manifest::manifest_content_type(content_type))
            .body(Bytes::copy_from_slice(manifest).into())
            .send()
            .await
            .map_err(|e| StorageError::S3(Box::new(e)))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get_manifest(&self, repo: &str, reference: &str) -> StorageResult<(Vec<u8>, String)> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(manifest_object_key(repo, reference))
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) if is_not_found(&err) => {
                return Err(StorageError::ManifestNotFound(format!("{repo}:{reference}")));
            }
            Err(err) => return Err(StorageError::S3(Box::new(err))),
        };

        let content_type = berth_core::manifest::manifest_content_type(
            output.content_type().unwrap_or_default(),
        )
        .to_string();
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(Box::new(e)))?
            .into_bytes();

        Ok((bytes.to_vec(), content_type))
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_backend(dir: &Path) -> S3Backend {
        S3Backend::new(
            "test-bucket",
            "http://s3.test:9000",
            "auto",
            "access",
            "secret",
            dir,
        )
    }

    #[tokio::test]
    async fn test_local_staging_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let backend = make_backend(dir.path());
        backend.init().await.unwrap();

        backend.create_upload("upload-1").await.unwrap();
        let body: ByteStream = Box::pin(futures::stream::once(async {
            Ok(Bytes::from_static(b"staged"))
        }));
        assert_eq!(backend.append_upload("upload-1", body).await.unwrap(), 6);
        assert_eq!(
            backend.upload_digest("upload-1").await.unwrap(),
            berth_core::Digest::compute(b"staged").hex()
        );
        backend.delete_upload("upload-1").await.unwrap();
        backend.delete_upload("upload-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_upload_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = make_backend(dir.path());
        backend.init().await.unwrap();

        backend.create_upload("upload-1").await.unwrap();
        assert!(matches!(
            backend.create_upload("upload-1").await,
            Err(StorageError::AlreadyExists(_))
        ));
    }
}
