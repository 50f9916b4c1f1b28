//! In-memory `MetadataStore` implementation for server tests.
//!
//! Mirrors the semantics of the PostgreSQL store closely enough for
//! integration tests to run without a database: upserts, reference swaps,
//! the unreferenced-blob listing, and the size cache.

use async_trait::async_trait;
use berth_metadata::error::{MetadataError, MetadataResult};
use berth_metadata::models::{
    ApiKeyRow, ApiKeyScopeRow, ApiKeyWithScopes, BlobRow, ManifestRow, RegistryRow, RepositoryRow,
    UserRow,
};
use berth_metadata::repos::{
    AddApiKeyArgs, AddRegistryWithKeyArgs, ApiKeyRepo, GcRepo, ManifestIndexRepo, RegistryRepo,
    RepositoryRepo, UpsertManifestIndexArgs, UserRepo,
};
use berth_metadata::store::MetadataStore;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    users: Vec<UserRow>,
    registries: Vec<RegistryRow>,
    repositories: Vec<RepositoryRow>,
    blobs: HashMap<String, BlobRow>,
    manifests: HashMap<String, ManifestRow>,
    /// (repository id, reference) -> (manifest digest, updated at)
    manifest_refs: HashMap<(Uuid, String), (String, OffsetDateTime)>,
    /// (repository id, manifest digest, blob digest)
    manifest_blob_refs: HashSet<(Uuid, String, String)>,
    api_keys: Vec<ApiKeyRow>,
    api_key_scopes: Vec<ApiKeyScopeRow>,
}

/// In-memory metadata store for tests.
#[derive(Default)]
pub struct MemoryMetadata {
    inner: Mutex<Inner>,
}

impl MemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every manifest reference, leaving blobs and dependency rows in
    /// place. Used to exercise the unreferenced-blob listing.
    pub fn clear_manifest_refs(&self) {
        self.inner.lock().unwrap().manifest_refs.clear();
    }

    fn referenced_blobs(inner: &Inner) -> HashSet<String> {
        let live: HashSet<(Uuid, String)> = inner
            .manifest_refs
            .iter()
            .map(|((repo_id, _), (digest, _))| (*repo_id, digest.clone()))
            .collect();
        inner
            .manifest_blob_refs
            .iter()
            .filter(|(repo_id, manifest_digest, _)| {
                live.contains(&(*repo_id, manifest_digest.clone()))
            })
            .map(|(_, _, blob_digest)| blob_digest.clone())
            .collect()
    }

    fn repository_mut<'a>(
        inner: &'a mut Inner,
        registry_id: Uuid,
        name: &str,
    ) -> Option<&'a mut RepositoryRow> {
        inner
            .repositories
            .iter_mut()
            .find(|r| r.registry_id == registry_id && r.name == name)
    }

    fn insert_repository(inner: &mut Inner, registry_id: Uuid, name: &str) -> RepositoryRow {
        let now = OffsetDateTime::now_utc();
        let row = RepositoryRow {
            id: Uuid::new_v4(),
            registry_id,
            name: name.to_string(),
            created_at: now,
            last_pushed_at: now,
            last_tag: None,
        };
        inner.repositories.push(row.clone());
        row
    }
}

#[async_trait]
impl UserRepo for MemoryMetadata {
    async fn ensure_user(&self, external_subject: &str, email: &str) -> MetadataResult<UserRow> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(user) = inner
            .users
            .iter()
            .find(|u| u.external_subject == external_subject)
        {
            return Ok(user.clone());
        }
        let user = UserRow {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            external_subject: external_subject.to_string(),
            email: email.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        inner.users.push(user.clone());
        Ok(user)
    }

    async fn is_org_member(&self, org_id: Uuid, user_id: Uuid) -> MetadataResult<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .users
            .iter()
            .any(|u| u.id == user_id && u.org_id == org_id))
    }
}

#[async_trait]
impl RegistryRepo for MemoryMetadata {
    async fn add_registry_with_key(
        &self,
        args: &AddRegistryWithKeyArgs,
    ) -> MetadataResult<(RegistryRow, ApiKeyWithScopes)> {
        let mut inner = self.inner.lock().unwrap();
        if inner.registries.iter().any(|r| r.name == args.name) {
            return Err(MetadataError::Conflict(format!(
                "registry name {:?} already exists",
                args.name
            )));
        }

        let registry = RegistryRow {
            id: Uuid::new_v4(),
            org_id: args.org_id,
            name: args.name.clone(),
            cached_size_bytes: 0,
            cached_size_updated_at: None,
        };
        inner.registries.push(registry.clone());

        let now = OffsetDateTime::now_utc();
        let key = ApiKeyRow {
            id: Uuid::new_v4(),
            user_id: args.user_id,
            name: args.key_name.clone(),
            prefix: args.prefix.clone(),
            secret_encrypted: args.secret_encrypted.clone(),
            created_at: now,
            last_used_at: None,
        };
        let scope = ApiKeyScopeRow {
            id: Uuid::new_v4(),
            api_key_id: key.id,
            registry_id: registry.id,
            repository_id: None,
            permission: berth_core::Permission::Admin.as_str().to_string(),
            created_at: now,
            repository_name: None,
        };
        inner.api_keys.push(key.clone());
        inner.api_key_scopes.push(scope.clone());

        Ok((
            registry,
            ApiKeyWithScopes {
                key,
                scopes: vec![scope],
            },
        ))
    }

    async fn get_registry_by_id(&self, id: Uuid) -> MetadataResult<Option<RegistryRow>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.registries.iter().find(|r| r.id == id).cloned())
    }

    async fn get_registry_by_name(&self, name: &str) -> MetadataResult<Option<RegistryRow>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.registries.iter().find(|r| r.name == name).cloned())
    }

    async fn list_registries_by_org(&self, org_id: Uuid) -> MetadataResult<Vec<RegistryRow>> {
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<_> = inner
            .registries
            .iter()
            .filter(|r| r.org_id == org_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
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

        let mut inner = self.inner.lock().unwrap();
        let registry = inner
            .registries
            .iter()
            .find(|r| r.id == registry_id)
            .cloned()
            .ok_or_else(|| MetadataError::NotFound(format!("registry {registry_id}")))?;

        if let Some(updated_at) = registry.cached_size_updated_at {
            if OffsetDateTime::now_utc() - updated_at < max_age {
                return Ok(registry.cached_size_bytes);
            }
        }

        let repo_ids: HashSet<Uuid> = inner
            .repositories
            .iter()
            .filter(|r| r.registry_id == registry_id)
            .map(|r| r.id)
            .collect();
        let live: HashSet<(Uuid, String)> = inner
            .manifest_refs
            .iter()
            .filter(|((repo_id, _), _)| repo_ids.contains(repo_id))
            .map(|((repo_id, _), (digest, _))| (*repo_id, digest.clone()))
            .collect();
        let referenced: HashSet<&String> = inner
            .manifest_blob_refs
            .iter()
            .filter(|(repo_id, manifest_digest, _)| {
                live.contains(&(*repo_id, manifest_digest.clone()))
            })
            .map(|(_, _, blob_digest)| blob_digest)
            .collect();
        let computed: i64 = referenced
            .iter()
            .filter_map(|digest| inner.blobs.get(*digest))
            .map(|blob| blob.size_bytes)
            .sum();

        let registry = inner
            .registries
            .iter_mut()
            .find(|r| r.id == registry_id)
            .expect("registry row vanished");
        registry.cached_size_bytes = computed;
        registry.cached_size_updated_at = Some(OffsetDateTime::now_utc());
        Ok(computed)
    }
}

#[async_trait]
impl RepositoryRepo for MemoryMetadata {
    async fn ensure_repository(
        &self,
        registry_id: Uuid,
        name: &str,
    ) -> MetadataResult<RepositoryRow> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = Self::repository_mut(&mut inner, registry_id, name) {
            return Ok(existing.clone());
        }
        Ok(Self::insert_repository(&mut inner, registry_id, name))
    }

    async fn touch_repository_push(
        &self,
        registry_id: Uuid,
        name: &str,
    ) -> MetadataResult<RepositoryRow> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = Self::repository_mut(&mut inner, registry_id, name) {
            existing.last_pushed_at = OffsetDateTime::now_utc();
            return Ok(existing.clone());
        }
        Ok(Self::insert_repository(&mut inner, registry_id, name))
    }

    async fn list_repositories_by_registry(
        &self,
        registry_id: Uuid,
    ) -> MetadataResult<Vec<RepositoryRow>> {
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<RepositoryRow> = inner
            .repositories
            .iter()
            .filter(|r| r.registry_id == registry_id)
            .cloned()
            .collect();

        for repo in &mut out {
            repo.last_tag = inner
                .manifest_refs
                .iter()
                .filter(|((repo_id, reference), _)| {
                    *repo_id == repo.id && berth_core::Digest::parse(reference).is_err()
                })
                .max_by_key(|(_, (_, updated_at))| *updated_at)
                .map(|((_, reference), _)| reference.clone());
        }

        out.sort_by(|a, b| {
            b.last_pushed_at
                .cmp(&a.last_pushed_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(out)
    }
}

#[async_trait]
impl ManifestIndexRepo for MemoryMetadata {
    async fn upsert_blob(&self, digest: &str, size_bytes: i64) -> MetadataResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let now = OffsetDateTime::now_utc();
        inner
            .blobs
            .entry(digest.trim().to_string())
            .and_modify(|blob| {
                blob.size_bytes = size_bytes;
                blob.last_seen_at = now;
            })
            .or_insert_with(|| BlobRow {
                digest: digest.trim().to_string(),
                size_bytes,
                first_seen_at: now,
                last_seen_at: now,
            });
        Ok(())
    }

    async fn upsert_manifest_index(&self, args: &UpsertManifestIndexArgs) -> MetadataResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let now = OffsetDateTime::now_utc();

        let touched = Self::repository_mut(&mut inner, args.registry_id, &args.repository).map(
            |existing| {
                existing.last_pushed_at = now;
                existing.id
            },
        );
        let repository_id = match touched {
            Some(id) => id,
            None => Self::insert_repository(&mut inner, args.registry_id, &args.repository).id,
        };

        inner
            .manifests
            .entry(args.manifest_digest.clone())
            .or_insert_with(|| ManifestRow {
                digest: args.manifest_digest.clone(),
                content_type: args.content_type.clone(),
                body: args.manifest_body.clone(),
                created_at: now,
            });

        for blob_digest in &args.blob_digests {
            inner.manifest_blob_refs.insert((
                repository_id,
                args.manifest_digest.clone(),
                blob_digest.clone(),
            ));
        }

        for reference in &args.references {
            inner.manifest_refs.insert(
                (repository_id, reference.clone()),
                (args.manifest_digest.clone(), now),
            );
        }

        Ok(())
    }

    async fn get_manifest_by_reference(
        &self,
        registry_id: Uuid,
        repository: &str,
        reference: &str,
    ) -> MetadataResult<Option<(Vec<u8>, String, String)>> {
        let inner = self.inner.lock().unwrap();
        let Some(repo) = inner
            .repositories
            .iter()
            .find(|r| r.registry_id == registry_id && r.name == repository)
        else {
            return Ok(None);
        };
        let Some((digest, _)) = inner.manifest_refs.get(&(repo.id, reference.to_string())) else {
            return Ok(None);
        };
        Ok(inner
            .manifests
            .get(digest)
            .map(|m| (m.body.clone(), m.content_type.clone(), m.digest.clone())))
    }
}

#[async_trait]
impl ApiKeyRepo for MemoryMetadata {
    async fn add_api_key(&self, args: &AddApiKeyArgs) -> MetadataResult<ApiKeyWithScopes> {
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

        let mut inner = self.inner.lock().unwrap();
        if inner
            .api_keys
            .iter()
            .any(|k| k.user_id == args.user_id && k.name == args.key_name)
        {
            return Err(MetadataError::Conflict(format!(
                "key name {:?} already exists",
                args.key_name
            )));
        }

        let now = OffsetDateTime::now_utc();
        let key = ApiKeyRow {
            id: Uuid::new_v4(),
            user_id: args.user_id,
            name: args.key_name.clone(),
            prefix: args.prefix.clone(),
            secret_encrypted: args.secret_encrypted.clone(),
            created_at: now,
            last_used_at: None,
        };

        let mut scopes = Vec::with_capacity(args.scopes.len());
        for scope in &args.scopes {
            let repository_name = scope.repository_id.and_then(|repo_id| {
                inner
                    .repositories
                    .iter()
                    .find(|r| r.id == repo_id)
                    .map(|r| r.name.clone())
            });
            scopes.push(ApiKeyScopeRow {
                id: Uuid::new_v4(),
                api_key_id: key.id,
                registry_id: scope.registry_id,
                repository_id: scope.repository_id,
                permission: scope.permission.as_str().to_string(),
                created_at: now,
                repository_name,
            });
        }

        inner.api_keys.push(key.clone());
        inner.api_key_scopes.extend(scopes.iter().cloned());
        Ok(ApiKeyWithScopes { key, scopes })
    }

    async fn list_api_keys_by_user(&self, user_id: Uuid) -> MetadataResult<Vec<ApiKeyWithScopes>> {
        let inner = self.inner.lock().unwrap();
        let mut keys: Vec<ApiKeyRow> = inner
            .api_keys
            .iter()
            .filter(|k| k.user_id == user_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys
            .into_iter()
            .map(|key| {
                let scopes = inner
                    .api_key_scopes
                    .iter()
                    .filter(|s| s.api_key_id == key.id)
                    .cloned()
                    .collect();
                ApiKeyWithScopes { key, scopes }
            })
            .collect())
    }

    async fn list_api_keys_for_org(&self, org_id: Uuid) -> MetadataResult<Vec<ApiKeyWithScopes>> {
        let user_ids: Vec<Uuid> = {
            let inner = self.inner.lock().unwrap();
            inner
                .users
                .iter()
                .filter(|u| u.org_id == org_id)
                .map(|u| u.id)
                .collect()
        };
        let mut out = Vec::new();
        for user_id in user_ids {
            out.extend(self.list_api_keys_by_user(user_id).await?);
        }
        Ok(out)
    }

    async fn remove_api_key(&self, user_id: Uuid, id: Uuid) -> MetadataResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.api_keys.len();
        inner.api_keys.retain(|k| !(k.user_id == user_id && k.id == id));
        if inner.api_keys.len() == before {
            return Err(MetadataError::NotFound(format!("api key {id}")));
        }
        inner.api_key_scopes.retain(|s| s.api_key_id != id);
        Ok(())
    }

    async fn touch_api_key_last_used(&self, id: Uuid) -> MetadataResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(key) = inner.api_keys.iter_mut().find(|k| k.id == id) {
            key.last_used_at = Some(OffsetDateTime::now_utc());
        }
        Ok(())
    }
}

#[async_trait]
impl GcRepo for MemoryMetadata {
    async fn list_unreferenced_blob_digests(&self, limit: i64) -> MetadataResult<Vec<String>> {
        let limit = if limit > 0 { limit as usize } else { 100 };
        let inner = self.inner.lock().unwrap();
        let referenced = Self::referenced_blobs(&inner);

        let mut unreferenced: Vec<&BlobRow> = inner
            .blobs
            .values()
            .filter(|blob| !referenced.contains(&blob.digest))
            .collect();
        unreferenced.sort_by_key(|blob| blob.last_seen_at);
        Ok(unreferenced
            .into_iter()
            .take(limit)
            .map(|blob| blob.digest.clone())
            .collect())
    }

    async fn delete_blob(&self, digest: &str) -> MetadataResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.blobs.remove(digest.trim());
        Ok(())
    }
}

impl MetadataStore for MemoryMetadata {}
