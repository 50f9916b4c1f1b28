//! User repository.

use crate::error::MetadataResult;
use crate::models::UserRow;
use async_trait::async_trait;

/// Repository for identity-provider-mirrored users.
#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Look up a user by external subject, creating it (and its personal
    /// organization) on first sight. Idempotent.
    async fn ensure_user(&self, external_subject: &str, email: &str) -> MetadataResult<UserRow>;

    /// Whether the user belongs to the given organization.
    async fn is_org_member(
        &self,
        org_id: uuid::Uuid,
        user_id: uuid::Uuid,
    ) -> MetadataResult<bool>;
}
