//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record mirrored from the identity provider on first login.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub org_id: Uuid,
    pub external_subject: String,
    pub email: String,
    pub created_at: OffsetDateTime,
}

/// Organization record: the ownership boundary for registries and keys.
#[derive(Debug, Clone, FromRow)]
pub struct OrganizationRow {
    pub id: Uuid,
    pub name: String,
    pub created_at: OffsetDateTime,
}

/// Registry record: a named tenant namespace, with the cached
/// referenced-bytes figure maintained by the size index.
#[derive(Debug, Clone, FromRow)]
pub struct RegistryRow {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub cached_size_bytes: i64,
    pub cached_size_updated_at: Option<OffsetDateTime>,
}

/// Repository record. `last_tag` is populated only by the listing query
/// (most recently updated non-digest reference); it is `NULL` elsewhere.
#[derive(Debug, Clone, FromRow)]
pub struct RepositoryRow {
    pub id: Uuid,
    pub registry_id: Uuid,
    pub name: String,
    pub created_at: OffsetDateTime,
    pub last_pushed_at: OffsetDateTime,
    pub last_tag: Option<String>,
}

/// Content-addressed blob record, globally deduplicated by digest string.
#[derive(Debug, Clone, FromRow)]
pub struct BlobRow {
    pub digest: String,
    pub size_bytes: i64,
    pub first_seen_at: OffsetDateTime,
    pub last_seen_at: OffsetDateTime,
}

/// Immutable manifest body keyed by its digest.
#[derive(Debug, Clone, FromRow)]
pub struct ManifestRow {
    pub digest: String,
    pub content_type: String,
    pub body: Vec<u8>,
    pub created_at: OffsetDateTime,
}

/// API key record. The full secret is recoverable (AES-256-GCM) so it can
/// be shown to its owner on listing.
#[derive(Debug, Clone, FromRow)]
pub struct ApiKeyRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub prefix: String,
    pub secret_encrypted: String,
    pub created_at: OffsetDateTime,
    pub last_used_at: Option<OffsetDateTime>,
}

/// API key scope row. `repository_name` is the joined leaf name of the
/// scoped repository, resolved for the matching algorithm.
#[derive(Debug, Clone, FromRow)]
pub struct ApiKeyScopeRow {
    pub id: Uuid,
    pub api_key_id: Uuid,
    pub registry_id: Uuid,
    pub repository_id: Option<Uuid>,
    pub permission: String,
    pub created_at: OffsetDateTime,
    pub repository_name: Option<String>,
}

/// An API key together with its scopes.
#[derive(Debug, Clone)]
pub struct ApiKeyWithScopes {
    pub key: ApiKeyRow,
    pub scopes: Vec<ApiKeyScopeRow>,
}
