//! Management API key handlers.

use crate::error::{ApiError, ApiResult};
use crate::session::require_user;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use berth_core::apikey::generate_api_key;
use berth_core::name::{registry_namespace, repo_leaf, valid_key_name, valid_repo_name};
use berth_core::Permission;
use berth_metadata::models::{ApiKeyScopeRow, ApiKeyWithScopes, UserRow};
use berth_metadata::repos::{
    AddApiKeyArgs, AddApiKeyScope, ApiKeyRepo, RegistryRepo, RepositoryRepo, UserRepo,
};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApiKeyRequest {
    pub key_name: String,
    #[serde(default)]
    pub scopes: Vec<CreateApiKeyScope>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApiKeyScope {
    pub registry_id: String,
    #[serde(default)]
    pub repository: Option<String>,
    pub permission: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyResponse {
    pub id: Uuid,
    pub key_name: String,
    pub prefix: String,
    pub secret_key: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<String>,
    pub scopes: Vec<ApiKeyScopeResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyScopeResponse {
    pub registry_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    pub permission: String,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct ListApiKeysResponse {
    pub keys: Vec<ApiKeyResponse>,
}

fn rfc3339(ts: time::OffsetDateTime) -> ApiResult<String> {
    ts.format(&Rfc3339)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("timestamp formatting failed: {e}")))
}

fn scope_responses(scopes: &[ApiKeyScopeRow]) -> ApiResult<Vec<ApiKeyScopeResponse>> {
    scopes
        .iter()
        .map(|scope| {
            Ok(ApiKeyScopeResponse {
                registry_id: scope.registry_id,
                repository: scope.repository_name.clone(),
                permission: scope.permission.clone(),
                created_at: rfc3339(scope.created_at)?,
            })
        })
        .collect()
}

/// Build the wire representation of a key, carrying its plaintext secret.
pub fn api_key_response(record: &ApiKeyWithScopes, secret_key: String) -> ApiResult<ApiKeyResponse> {
    Ok(ApiKeyResponse {
        id: record.key.id,
        key_name: record.key.name.clone(),
        prefix: record.key.prefix.clone(),
        secret_key,
        created_at: rfc3339(record.key.created_at)?,
        last_used_at: record.key.last_used_at.map(rfc3339).transpose()?,
        scopes: scope_responses(&record.scopes)?,
    })
}

async fn resolve_scopes(
    state: &AppState,
    user: &UserRow,
    raw_scopes: &[CreateApiKeyScope],
) -> ApiResult<Vec<AddApiKeyScope>> {
    if raw_scopes.is_empty() {
        return Err(ApiError::BadRequest("at least one scope is required".into()));
    }

    let mut out = Vec::with_capacity(raw_scopes.len());
    for raw in raw_scopes {
        let registry_id = Uuid::parse_str(raw.registry_id.trim())
            .map_err(|_| ApiError::BadRequest("registryId is malformed".into()))?;

        let registry = state
            .metadata
            .get_registry_by_id(registry_id)
            .await?
            .ok_or_else(|| ApiError::BadRequest("registry does not exist".into()))?;

        let is_member = state.metadata.is_org_member(registry.org_id, user.id).await?;
        if !is_member {
            return Err(ApiError::Forbidden(
                "not allowed to create key for that registry".into(),
            ));
        }

        let permission = Permission::parse(&raw.permission)
            .map_err(|_| ApiError::BadRequest("permission must be read, write, or admin".into()))?;

        let mut repository_id = None;
        if let Some(repo) = raw.repository.as_deref().map(str::trim) {
            if !repo.is_empty() {
                if !valid_repo_name(repo) {
                    return Err(ApiError::BadRequest("repository name is invalid".into()));
                }
                if registry_namespace(repo) != registry.name {
                    return Err(ApiError::BadRequest(
                        "repository must belong to the selected registry".into(),
                    ));
                }
                let repository = state
                    .metadata
                    .ensure_repository(registry_id, repo_leaf(repo))
                    .await?;
                repository_id = Some(repository.id);
            }
        }

        out.push(AddApiKeyScope {
            registry_id,
            repository_id,
            permission,
        });
    }

    Ok(out)
}

/// `POST /api/v1/api-keys`.
pub async fn create_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateApiKeyRequest>,
) -> ApiResult<(StatusCode, Json<ApiKeyResponse>)> {
    let user = require_user(&state, &headers).await?;

    if !valid_key_name(&request.key_name) {
        return Err(ApiError::BadRequest(
            "Must be 2-8 chars of letters, numbers, '.', '_' or '-'".into(),
        ));
    }

    let scopes = resolve_scopes(&state, &user, &request.scopes).await?;

    let (full_key, prefix) = generate_api_key();
    let encrypted = state
        .api_keys
        .encrypt(&full_key)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!(e)))?;

    let record = state
        .metadata
        .add_api_key(&AddApiKeyArgs {
            user_id: user.id,
            key_name: request.key_name.clone(),
            secret_encrypted: encrypted,
            prefix,
            scopes,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(api_key_response(&record, full_key)?)))
}

/// `GET /api/v1/api-keys`.
pub async fn list_api_keys(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ListApiKeysResponse>> {
    let user = require_user(&state, &headers).await?;

    let records = state.metadata.list_api_keys_by_user(user.id).await?;
    let mut keys = Vec::with_capacity(records.len());
    for record in &records {
        let full_key = state
            .api_keys
            .decrypt(&record.key.secret_encrypted)
            .map_err(|e| ApiError::Internal(anyhow::anyhow!(e)))?;
        keys.push(api_key_response(record, full_key)?);
    }

    Ok(Json(ListApiKeysResponse { keys }))
}

/// `DELETE /api/v1/api-keys/{id}`.
pub async fn remove_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let user = require_user(&state, &headers).await?;

    let id =
        Uuid::parse_str(id.trim()).map_err(|_| ApiError::BadRequest("Key ID malformed".into()))?;
    state.metadata.remove_api_key(user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
