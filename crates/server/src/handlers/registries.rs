//! Management registry and repository handlers.

use crate::error::{ApiError, ApiResult};
use crate::handlers::api_keys::{ApiKeyResponse, api_key_response};
use crate::session::require_user;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use berth_core::apikey::generate_api_key;
use berth_core::name::valid_registry_name;
use berth_metadata::repos::{AddRegistryWithKeyArgs, RegistryRepo, RepositoryRepo};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

/// Staleness bound for the referenced-bytes figure shown to users.
const SIZE_CACHE_MAX_AGE: time::Duration = time::Duration::seconds(60);

#[derive(Debug, Deserialize)]
pub struct AddRegistryRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct RegistryResponse {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryDetailResponse {
    pub id: Uuid,
    pub name: String,
    pub size_bytes: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddRegistryResponse {
    pub id: Uuid,
    pub name: String,
    pub api_key: ApiKeyResponse,
}

#[derive(Debug, Serialize)]
pub struct ListRegistriesResponse {
    pub registries: Vec<RegistryResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryResponse {
    pub id: Uuid,
    pub name: String,
    pub last_push: String,
    pub last_tag: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListRepositoriesResponse {
    pub repositories: Vec<RepositoryResponse>,
}

#[derive(Debug, Deserialize)]
pub struct ExistsQuery {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRepositoriesQuery {
    #[serde(default)]
    pub registry_id: String,
}

/// `POST /api/v1/registries` — create a registry plus its default
/// registry-wide admin key, atomically.
pub async fn add_registry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AddRegistryRequest>,
) -> ApiResult<(StatusCode, Json<AddRegistryResponse>)> {
    let user = require_user(&state, &headers).await?;

    let name = request.name.trim().to_string();
    if !valid_registry_name(&name) {
        return Err(ApiError::BadRequest("invalid registry name".into()));
    }

    let (full_key, prefix) = generate_api_key();
    let encrypted = state
        .api_keys
        .encrypt(&full_key)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!(e)))?;

    let (registry, key) = state
        .metadata
        .add_registry_with_key(&AddRegistryWithKeyArgs {
            org_id: user.org_id,
            name,
            user_id: user.id,
            key_name: "default".to_string(),
            secret_encrypted: encrypted,
            prefix,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(AddRegistryResponse {
            id: registry.id,
            name: registry.name,
            api_key: api_key_response(&key, full_key)?,
        }),
    ))
}

/// `GET /api/v1/registries`.
pub async fn list_registries(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ListRegistriesResponse>> {
    let user = require_user(&state, &headers).await?;

    let registries = state.metadata.list_registries_by_org(user.org_id).await?;
    Ok(Json(ListRegistriesResponse {
        registries: registries
            .into_iter()
            .map(|registry| RegistryResponse {
                id: registry.id,
                name: registry.name,
            })
            .collect(),
    }))
}

/// `GET /api/v1/registries/{id}` — includes the referenced-bytes figure
/// with bounded staleness.
pub async fn get_registry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<RegistryDetailResponse>> {
    let user = require_user(&state, &headers).await?;

    let id = Uuid::parse_str(id.trim())
        .map_err(|_| ApiError::BadRequest("invalid registry id".into()))?;

    let registry = state
        .metadata
        .get_registry_by_id(id)
        .await?
        .filter(|registry| registry.org_id == user.org_id)
        .ok_or_else(|| ApiError::NotFound("registry not found".into()))?;

    let size_bytes = state
        .metadata
        .get_registry_referenced_bytes_cached(registry.id, SIZE_CACHE_MAX_AGE)
        .await?;

    Ok(Json(RegistryDetailResponse {
        id: registry.id,
        name: registry.name,
        size_bytes,
    }))
}

/// `GET /api/v1/registries/exists?name=…` — name availability probe.
/// Intentionally unauthenticated: it leaks only what the global name
/// uniqueness constraint already implies.
pub async fn registry_exists(
    State(state): State<AppState>,
    Query(query): Query<ExistsQuery>,
) -> ApiResult<Json<bool>> {
    let name = query.name.trim();
    if !valid_registry_name(name) {
        return Err(ApiError::BadRequest("bad registry name".into()));
    }

    let registry = state.metadata.get_registry_by_name(name).await?;
    Ok(Json(registry.is_some()))
}

/// `GET /api/v1/repositories?registryId=…`.
pub async fn list_repositories(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListRepositoriesQuery>,
) -> ApiResult<Json<ListRepositoriesResponse>> {
    let user = require_user(&state, &headers).await?;

    let raw_id = query.registry_id.trim();
    if raw_id.is_empty() {
        return Err(ApiError::BadRequest("registryId is required".into()));
    }
    let id = Uuid::parse_str(raw_id).map_err(|_| ApiError::BadRequest("invalid registryId".into()))?;

    let registry = state
        .metadata
        .get_registry_by_id(id)
        .await?
        .filter(|registry| registry.org_id == user.org_id)
        .ok_or_else(|| ApiError::NotFound("registry not found".into()))?;

    let repositories = state
        .metadata
        .list_repositories_by_registry(registry.id)
        .await?;

    let mut out = Vec::with_capacity(repositories.len());
    for repository in repositories {
        out.push(RepositoryResponse {
            id: repository.id,
            name: repository.name,
            last_push: repository
                .last_pushed_at
                .format(&Rfc3339)
                .map_err(|e| ApiError::Internal(anyhow::anyhow!("timestamp formatting failed: {e}")))?,
            last_tag: repository.last_tag,
        });
    }

    Ok(Json(ListRepositoriesResponse { repositories: out }))
}
