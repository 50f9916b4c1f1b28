//! The combined metadata store trait.

use crate::repos::{ApiKeyRepo, GcRepo, ManifestIndexRepo, RegistryRepo, RepositoryRepo, UserRepo};

/// The full control-plane surface the server depends on. Implemented by
/// [`PostgresStore`](crate::PostgresStore) in production and by an
/// in-memory double in the server's test support.
pub trait MetadataStore:
    UserRepo + RegistryRepo + RepositoryRepo + ManifestIndexRepo + ApiKeyRepo + GcRepo + Send + Sync
{
}
