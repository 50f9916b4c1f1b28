//! Object storage abstraction and backends for Berth.
//!
//! This crate provides:
//! - Content-addressed blob storage with resumable staged uploads
//! - Atomic promotion of an upload to its canonical blob key
//! - Backends: local filesystem and S3-compatible (Cloudflare R2)

pub mod backends;
pub mod error;
pub mod keys;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use keys::{blob_object_key, manifest_object_key, upload_object_key};
pub use traits::{BlobStore, ByteStream};

use berth_core::config::StorageConfig;
use std::sync::Arc;

/// Create a blob store from configuration. The store is not yet
/// initialized; call [`BlobStore::init`] before serving.
pub fn from_config(config: &StorageConfig) -> Arc<dyn BlobStore> {
    match config {
        StorageConfig::Local { data_dir } => Arc::new(FilesystemBackend::new(data_dir)),
        StorageConfig::R2 {
            bucket,
            endpoint,
            region,
            access_key_id,
            secret_access_key,
            data_dir,
        } => Arc::new(S3Backend::new(
            bucket,
            endpoint,
            region,
            access_key_id,
            secret_access_key,
            data_dir,
        )),
    }
}
