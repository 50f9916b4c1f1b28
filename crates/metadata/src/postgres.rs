//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{
    ApiKeyRow, ApiKeyScopeRow, ApiKeyWithScopes, RegistryRow, RepositoryRow, UserRow,
};
use crate::repos::{
    AddApiKeyArgs, AddRegistryWithKeyArgs, ApiKeyRepo, GcRepo, ManifestIndexRepo, RegistryRepo,
    RepositoryRepo, UpsertManifestIndexArgs, UserRepo,
};
use crate::store::MetadataStore;
use async_trait::async_trait;
use berth_core::config::DatabaseConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use time::OffsetDateTime;
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err)
            if db_err.kind() == sqlx::error::ErrorKind::UniqueViolation
    )
}

fn dedupe_non_empty(values: &[String]) -> Vec<&str> {
    let mut seen = std::collections::HashSet::with_capacity(values.len());
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && seen.insert(*v))
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Connect to PostgreSQL and apply the embedded schema.
    pub async fn connect(config: &DatabaseConfig, max_connections: u32) -> MetadataResult<Self> {
        tracing::info!(
            host = %config.hostname,
            port = config.port,
            database = %config.database,
            "Connecting to PostgreSQL"
        );
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(&config.dsn())
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Connect with a raw URL (tests and tooling).
    pub async fn from_url(url: &str, max_connections: u32) -> MetadataResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    async fn migrate(&self) -> MetadataResult<()> {
        for statement in schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Load scopes for a set of keys, with repository leaf names resolved.
    async fn scopes_for_keys(&self, key_ids: &[Uuid]) -> MetadataResult<Vec<ApiKeyScopeRow>> {
        if key_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, ApiKeyScopeRow>(
            r#"
            SELECT s.id, s.api_key_id, s.registry_id, s.repository_id,
                   s.permission, s.created_at, r.name AS repository_name
            FROM api_key_scopes s
            LEFT JOIN repositories r ON r.id = s.repository_id
            WHERE s.api_key_id = ANY($1)
            ORDER BY s.created_at ASC
            "#,
        )
        .bind(key_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    fn attach_scopes(
        keys: Vec<ApiKeyRow>,
        mut scopes: Vec<ApiKeyScopeRow>,
    ) -> Vec<ApiKeyWithScopes> {
        let mut by_key: std::collections::HashMap<Uuid, Vec<ApiKeyScopeRow>> =
            std::collections::HashMap::with_capacity(keys.len());
        for scope in scopes.drain(..) {
            by_key.entry(scope.api_key_id).or_default().push(scope);
        }
        keys.into_iter()
            .map(|key| {
                let scopes = by_key.remove(&key.id).unwrap_or_default();
                ApiKeyWithScopes { key, scopes }
            })
            .collect()
    }
}

#[async_trait]
impl UserRepo for PostgresStore {
    async fn ensure_user(&self, external_subject: &str, email: &str) -> MetadataResult<UserRow> {
        if let Some(user) =
            sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE external_subject = $1")
                .bind(external_subject)
                .fetch_optional(&self.pool)
                .await?
        {
            return Ok(user);
        }

        let mut tx = self.pool.begin().await?;
        let org_id = Uuid::new_v4();
        sqlx::query("INSERT INTO organizations (id, name) VALUES ($1, $2)")
            .bind(org_id)
            .bind(email)
            .execute(&mut *tx)
            .await?;

        let inserted = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (id, org_id, external_subject, email)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(org_id)
        .bind(external_subject)
        .bind(email)
        .fetch_one(&mut *tx)
        .await;

        match inserted {
            Ok(user) => {
                tx.commit().await?;
                Ok(user)
            }
            Err(e) if is_unique_violation(&e) => {
                // Lost a concurrent first-login race; the other insert won.
                drop(tx);
                sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE external_subject = $1")
                    .bind(external_subject)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(Into::into)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn is_org_member(&self, org_id: Uuid, user_id: Uuid) -> MetadataResult<bool> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM users WHERE id = $1 AND org_id = $2")
                .bind(user_id)
                .bind(org_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl RegistryRepo for PostgresStore {
    async fn add_registry_with_key(
        &self,
        args: &AddRegistryWithKeyArgs,
    ) -> MetadataResult<(RegistryRow, ApiKeyWithScopes)> {
        let mut tx = self.pool.begin().await?;

        let registry_id = Uuid::new_v4();
        let registry = sqlx::query_as::<_, RegistryRow>(
            r#"
            INSERT INTO registries (id, org_id, name)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(registry_id)
        .bind(args.org_id)
        .bind(&args.name)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                MetadataError::Conflict(format!("registry name {:?} already exists", args.name))
            } else {
                e.into()
            }
        })?;

        let key = sqlx::query_as::<_, ApiKeyRow>(
            r#"
            INSERT INTO api_keys (id, user_id, name, secret_encrypted, prefix)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(args.user_id)
        .bind(&args.key_name)
        .bind(&args.secret_encrypted)
        .bind(&args.prefix)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                MetadataError::Conflict(format!("key name {:?} already exists", args.key_name))
            } else {
                e.into()
            }
        })?;

        // The default key is registry-wide admin.
        let scope = sqlx::query_as::<_, ApiKeyScopeRow>(
            r#"
            INSERT INTO api_key_scopes (id, api_key_id, registry_id, repository_id, permission)
            VALUES ($1, $2, $3, NULL, $4)
            RETURNING id, api_key_id, registry_id, repository_id, permission, created_at,
                      NULL::text AS repository_name
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(key.id)
        .bind(registry.id)
        .bind(berth_core::Permission::Admin.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((
            registry,
            ApiKeyWithScopes {
                key,
                scopes: vec![scope],
            },
        ))
    }

    async fn get_registry_by_id(&self, id: Uuid) -> MetadataResult<Option<RegistryRow>> {
        let row = sqlx::query_as::<_, RegistryRow>("SELECT * FROM registries WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_registry_by_name(&self, name: &str) -> MetadataResult<Option<RegistryRow>> {
        let row = sqlx::query_as::<_, RegistryRow>("SELECT * FROM registries WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_registries_by_org(&self, org_id: Uuid) -> MetadataResult<Vec<RegistryRow>> {
        let rows = sqlx::query_as::<_, RegistryRow>(
            "SELECT * FROM registries WHERE org_id = $1 ORDER BY name ASC",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_registry_referenced_bytes_cached(
        &self,
        registry_id: Uuid,
        max_age: time::Duration,
    ) -> MetadataResult<i64> {
        let max_age = if max_age.is_positive() {
            max_age
        } else {
            time::Duration::seconds(60)
        };

        let mut tx = self.pool.begin().await?;

        // The row lock serializes concurrent recomputes for one registry.
        let row: Option<(i64, Option<OffsetDateTime>)> = sqlx::query_as(
            "SELECT cached_size_bytes, cached_size_updated_at FROM registries WHERE id = $1 FOR UPDATE",
        )
        .bind(registry_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((cached_size_bytes, cached_size_updated_at)) = row else {
            return Err(MetadataError::NotFound(format!("registry {registry_id}")));
        };

        if let Some(updated_at) = cached_size_updated_at {
            if OffsetDateTime::now_utc() - updated_at < max_age {
                tx.commit().await?;
                return Ok(cached_size_bytes);
            }
        }

        let (computed_size_bytes,): (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(b.size_bytes), 0)::BIGINT
            FROM (
                SELECT DISTINCT mb.blob_digest
                FROM repositories r
                JOIN manifest_refs mr
                  ON mr.repository_id = r.id
                JOIN manifest_blob_refs mb
                  ON mb.repository_id = mr.repository_id
                 AND mb.manifest_digest = mr.manifest_digest
                WHERE r.registry_id = $1
            ) referenced
            JOIN blobs b
              ON b.digest = referenced.blob_digest
            "#,
        )
        .bind(registry_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE registries SET cached_size_bytes = $2, cached_size_updated_at = NOW() WHERE id = $1",
        )
        .bind(registry_id)
        .bind(computed_size_bytes)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(computed_size_bytes)
    }
}

#[async_trait]
impl RepositoryRepo for PostgresStore {
    async fn ensure_repository(
        &self,
        registry_id: Uuid,
        name: &str,
    ) -> MetadataResult<RepositoryRow> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MetadataError::Internal("repository name is required".into()));
        }
        let row = sqlx::query_as::<_, RepositoryRow>(
            r#"
            INSERT INTO repositories (id, registry_id, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (registry_id, name)
            DO UPDATE SET name = EXCLUDED.name
            RETURNING id, registry_id, name, created_at, last_pushed_at, NULL::text AS last_tag
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(registry_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn touch_repository_push(
        &self,
        registry_id: Uuid,
        name: &str,
    ) -> MetadataResult<RepositoryRow> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MetadataError::Internal("repository name is required".into()));
        }
        let row = sqlx::query_as::<_, RepositoryRow>(
            r#"
            INSERT INTO repositories (id, registry_id, name, last_pushed_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (registry_id, name)
            DO UPDATE SET last_pushed_at = NOW()
            RETURNING id, registry_id, name, created_at, last_pushed_at, NULL::text AS last_tag
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(registry_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_repositories_by_registry(
        &self,
        registry_id: Uuid,
    ) -> MetadataResult<Vec<RepositoryRow>> {
        let rows = sqlx::query_as::<_, RepositoryRow>(
            r#"
            SELECT
                r.id,
                r.registry_id,
                r.name,
                r.created_at,
                r.last_pushed_at,
                last_tag.reference AS last_tag
            FROM repositories r
            LEFT JOIN LATERAL (
                SELECT mr.reference
                FROM manifest_refs mr
                WHERE mr.repository_id = r.id
                  AND mr.reference !~ '^sha256:[a-f0-9]{64}$'
                ORDER BY mr.updated_at DESC
                LIMIT 1
            ) AS last_tag ON TRUE
            WHERE r.registry_id = $1
            ORDER BY r.last_pushed_at DESC, r.name ASC
            "#,
        )
        .bind(registry_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl ManifestIndexRepo for PostgresStore {
    async fn upsert_blob(&self, digest: &str, size_bytes: i64) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO blobs (digest, size_bytes)
            VALUES ($1, $2)
            ON CONFLICT (digest)
            DO UPDATE SET size_bytes = EXCLUDED.size_bytes, last_seen_at = NOW()
            "#,
        )
        .bind(digest.trim())
        .bind(size_bytes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_manifest_index(&self, args: &UpsertManifestIndexArgs) -> MetadataResult<()> {
        let repository = args.repository.trim();
        let manifest_digest = args.manifest_digest.trim();
        let content_type = args.content_type.trim();
        if repository.is_empty() {
            return Err(MetadataError::Internal("repository is required".into()));
        }
        if manifest_digest.is_empty() {
            return Err(MetadataError::Internal("manifest digest is required".into()));
        }
        if args.manifest_body.is_empty() {
            return Err(MetadataError::Internal("manifest body is required".into()));
        }
        if content_type.is_empty() {
            return Err(MetadataError::Internal(
                "manifest content type is required".into(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let (repository_id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO repositories (id, registry_id, name, last_pushed_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (registry_id, name)
            DO UPDATE SET last_pushed_at = NOW()
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(args.registry_id)
        .bind(repository)
        .fetch_one(&mut *tx)
        .await?;

        // Content addressing guarantees any existing row with this digest
        // already holds byte-identical content.
        sqlx::query(
            r#"
            INSERT INTO manifests (digest, content_type, body)
            VALUES ($1, $2, $3)
            ON CONFLICT (digest)
            DO UPDATE SET content_type = EXCLUDED.content_type, body = EXCLUDED.body
            "#,
        )
        .bind(manifest_digest)
        .bind(content_type)
        .bind(&args.manifest_body)
        .execute(&mut *tx)
        .await?;

        for blob_digest in dedupe_non_empty(&args.blob_digests) {
            sqlx::query(
                r#"
                INSERT INTO manifest_blob_refs (repository_id, manifest_digest, blob_digest)
                VALUES ($1, $2, $3)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(repository_id)
            .bind(manifest_digest)
            .bind(blob_digest)
            .execute(&mut *tx)
            .await?;
        }

        for reference in dedupe_non_empty(&args.references) {
            sqlx::query(
                r#"
                INSERT INTO manifest_refs (repository_id, reference, manifest_digest)
                VALUES ($1, $2, $3)
                ON CONFLICT (repository_id, reference)
                DO UPDATE SET manifest_digest = EXCLUDED.manifest_digest, updated_at = NOW()
                "#,
            )
            .bind(repository_id)
            .bind(reference)
            .bind(manifest_digest)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_manifest_by_reference(
        &self,
        registry_id: Uuid,
        repository: &str,
        reference: &str,
    ) -> MetadataResult<Option<(Vec<u8>, String, String)>> {
        let row: Option<(Vec<u8>, String, String)> = sqlx::query_as(
            r#"
            SELECT m.body, m.content_type, m.digest
            FROM repositories r
            JOIN manifest_refs mr ON mr.repository_id = r.id
            JOIN manifests m ON m.digest = mr.manifest_digest
            WHERE r.registry_id = $1
              AND r.name = $2
              AND mr.reference = $3
            LIMIT 1
            "#,
        )
        .bind(registry_id)
        .bind(repository.trim())
        .bind(reference.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl ApiKeyRepo for PostgresStore {
    async fn add_api_key(&self, args: &AddApiKeyArgs) -> MetadataResult<ApiKeyWithScopes> {
        // Reject duplicate targets before touching the database so the
        // error is deterministic regardless of insert order.
        for (i, scope) in args.scopes.iter().enumerate() {
            for other in &args.scopes[..i] {
                if scope.registry_id == other.registry_id
                    && scope.repository_id == other.repository_id
                {
                    return Err(MetadataError::ScopeConflict(format!(
                        "registry {}",
                        scope.registry_id
                    )));
                }
            }
        }

        let mut tx = self.pool.begin().await?;

        let key = sqlx::query_as::<_, ApiKeyRow>(
            r#"
            INSERT INTO api_keys (id, user_id, name, secret_encrypted, prefix)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(args.user_id)
        .bind(&args.key_name)
        .bind(&args.secret_encrypted)
        .bind(&args.prefix)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                MetadataError::Conflict(format!("key name {:?} already exists", args.key_name))
            } else {
                e.into()
            }
        })?;

        let mut scopes = Vec::with_capacity(args.scopes.len());
        for scope in &args.scopes {
            let row = sqlx::query_as::<_, ApiKeyScopeRow>(
                r#"
                INSERT INTO api_key_scopes (id, api_key_id, registry_id, repository_id, permission)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, api_key_id, registry_id, repository_id, permission, created_at,
                          (SELECT name FROM repositories WHERE id = $4) AS repository_name
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(key.id)
            .bind(scope.registry_id)
            .bind(scope.repository_id)
            .bind(scope.permission.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    MetadataError::ScopeConflict(format!("registry {}", scope.registry_id))
                } else {
                    e.into()
                }
            })?;
            scopes.push(row);
        }

        tx.commit().await?;
        Ok(ApiKeyWithScopes { key, scopes })
    }

    async fn list_api_keys_by_user(&self, user_id: Uuid) -> MetadataResult<Vec<ApiKeyWithScopes>> {
        let keys = sqlx::query_as::<_, ApiKeyRow>(
            "SELECT * FROM api_keys WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = keys.iter().map(|k| k.id).collect();
        let scopes = self.scopes_for_keys(&ids).await?;
        Ok(Self::attach_scopes(keys, scopes))
    }

    async fn list_api_keys_for_org(&self, org_id: Uuid) -> MetadataResult<Vec<ApiKeyWithScopes>> {
        let keys = sqlx::query_as::<_, ApiKeyRow>(
            r#"
            SELECT k.*
            FROM api_keys k
            JOIN users u ON u.id = k.user_id
            WHERE u.org_id = $1
            ORDER BY k.created_at DESC
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = keys.iter().map(|k| k.id).collect();
        let scopes = self.scopes_for_keys(&ids).await?;
        Ok(Self::attach_scopes(keys, scopes))
    }

    async fn remove_api_key(&self, user_id: Uuid, id: Uuid) -> MetadataResult<()> {
        let result = sqlx::query("DELETE FROM api_keys WHERE user_id = $1 AND id = $2")
            .bind(user_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!("api key {id}")));
        }
        Ok(())
    }

    async fn touch_api_key_last_used(&self, id: Uuid) -> MetadataResult<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl GcRepo for PostgresStore {
    async fn list_unreferenced_blob_digests(&self, limit: i64) -> MetadataResult<Vec<String>> {
        let limit = if limit > 0 { limit } else { 100 };
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            WITH referenced_blobs AS (
                SELECT DISTINCT mb.blob_digest
                FROM manifest_blob_refs mb
                JOIN manifest_refs mr
                  ON mr.repository_id = mb.repository_id
                 AND mr.manifest_digest = mb.manifest_digest
            )
            SELECT b.digest
            FROM blobs b
            LEFT JOIN referenced_blobs r
              ON r.blob_digest = b.digest
            WHERE r.blob_digest IS NULL
            ORDER BY b.last_seen_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(digest,)| digest).collect())
    }

    async fn delete_blob(&self, digest: &str) -> MetadataResult<()> {
        sqlx::query("DELETE FROM blobs WHERE digest = $1")
            .bind(digest.trim())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl MetadataStore for PostgresStore {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_skip_comments_and_blanks() {
        let statements = schema_statements(POSTGRES_SCHEMA);
        assert!(!statements.is_empty());
        for statement in &statements {
            assert!(
                statement.to_ascii_uppercase().contains("CREATE"),
                "unexpected statement: {statement}"
            );
        }
    }

    #[test]
    fn test_dedupe_non_empty() {
        let values = vec![
            "a".to_string(),
            " a ".to_string(),
            "".to_string(),
            "b".to_string(),
        ];
        assert_eq!(dedupe_non_empty(&values), vec!["a", "b"]);
    }
}
