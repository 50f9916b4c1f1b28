//! Core domain types and shared logic for the Berth container registry.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Content digests and incremental hashing
//! - Repository, reference, and registry name validation
//! - Image manifest parsing and content-type normalization
//! - API key material, encryption, and permission levels
//! - Registry token access claims and the scope-granting algorithm
//! - Environment-driven configuration

pub mod access;
pub mod apikey;
pub mod config;
pub mod digest;
pub mod error;
pub mod manifest;
pub mod name;

pub use access::{KeyScope, RepositoryAccess, grant_token_scopes, token_access_allows};
pub use apikey::{ApiKeyCipher, Permission};
pub use config::{AppConfig, DatabaseConfig, RegistryConfig, StorageConfig};
pub use digest::{Digest, DigestHasher};
pub use error::{Error, Result};
pub use manifest::ImageManifest;

/// Maximum accepted manifest body size: 8 MiB.
pub const MAX_MANIFEST_SIZE: usize = 8 * 1024 * 1024;

/// Content type served for blobs.
pub const DEFAULT_BLOB_CONTENT_TYPE: &str = "application/octet-stream";

/// Default manifest content type when the client supplies none.
pub const DEFAULT_MANIFEST_CONTENT_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
