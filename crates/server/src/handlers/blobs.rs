//! Blob upload and fetch handlers.

use crate::auth::{RegistryAuth, ensure_repo_authorized};
use crate::error::{OciError, OciResult, internal_error};
use crate::state::AppState;
use crate::v2::upload_range;
use axum::body::Body;
use axum::http::StatusCode;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use axum::response::{IntoResponse, Response};
use berth_core::name::{valid_repo_name, valid_upload_id};
use berth_core::{DEFAULT_BLOB_CONTENT_TYPE, Digest};
use berth_metadata::repos::ManifestIndexRepo;
use berth_storage::{BlobStore, ByteStream, StorageError};
use futures::TryStreamExt;
use uuid::Uuid;

const UPLOAD_UUID_HEADER: &str = "Docker-Upload-UUID";
const CONTENT_DIGEST_HEADER: &str = "Docker-Content-Digest";

fn upload_location(repo: &str, upload_id: &str) -> String {
    format!("/v2/{repo}/blobs/uploads/{upload_id}")
}

fn blob_location(repo: &str, digest: &Digest) -> String {
    format!("/v2/{repo}/blobs/{digest}")
}

/// Adapt an axum request body into the storage byte stream.
fn body_stream(body: Body) -> ByteStream {
    Box::pin(
        body.into_data_stream()
            .map_err(|e| std::io::Error::other(e.to_string())),
    )
}

fn validate_upload_request(
    auth: &RegistryAuth,
    repo: &str,
    upload_id: Option<&str>,
) -> OciResult<()> {
    if !valid_repo_name(repo) {
        return Err(OciError::name_invalid());
    }
    ensure_repo_authorized(auth, repo)?;
    if let Some(upload_id) = upload_id {
        if !valid_upload_id(upload_id) {
            return Err(OciError::blob_upload_invalid());
        }
    }
    Ok(())
}

/// `POST /v2/<repo>/blobs/uploads/` — open a staging slot.
pub async fn start_upload(
    state: &AppState,
    auth: &RegistryAuth,
    repo: &str,
) -> OciResult<Response> {
    validate_upload_request(auth, repo, None)?;

    let upload_id = Uuid::new_v4().to_string();
    state
        .storage
        .create_upload(&upload_id)
        .await
        .map_err(|e| internal_error("failed to create upload", e))?;

    Ok((
        StatusCode::ACCEPTED,
        [
            (LOCATION.as_str(), upload_location(repo, &upload_id)),
            (UPLOAD_UUID_HEADER, upload_id.clone()),
            ("Range", "0-0".to_string()),
        ],
    )
        .into_response())
}

/// `PATCH /v2/<repo>/blobs/uploads/<uuid>` — append a chunk.
pub async fn patch_upload(
    state: &AppState,
    auth: &RegistryAuth,
    repo: &str,
    upload_id: &str,
    body: Body,
) -> OciResult<Response> {
    validate_upload_request(auth, repo, Some(upload_id))?;

    let size = match state.storage.append_upload(upload_id, body_stream(body)).await {
        Ok(size) => size,
        Err(StorageError::UploadNotFound(_)) => return Err(OciError::blob_upload_unknown()),
        Err(e) => return Err(internal_error("failed to append upload", e)),
    };

    Ok((
        StatusCode::ACCEPTED,
        [
            (LOCATION.as_str(), upload_location(repo, upload_id)),
            (UPLOAD_UUID_HEADER, upload_id.to_string()),
            ("Range", upload_range(size)),
        ],
    )
        .into_response())
}

/// `PUT /v2/<repo>/blobs/uploads/<uuid>?digest=…` — finalize an upload.
///
/// Any carried body is appended first, so a monolithic `POST` + `PUT`
/// without an intermediate `PATCH` works. The computed hash must match the
/// supplied digest before promotion; when the blob already exists the
/// upload is simply dropped.
pub async fn put_upload(
    state: &AppState,
    auth: &RegistryAuth,
    repo: &str,
    upload_id: &str,
    query: &str,
    body: Body,
) -> OciResult<Response> {
    validate_upload_request(auth, repo, Some(upload_id))?;

    let digest_param = query_value(query, "digest")
        .ok_or_else(|| OciError::digest_invalid("digest query parameter is required"))?;
    let digest = Digest::parse(&digest_param).map_err(|e| OciError::digest_invalid(e.to_string()))?;

    match state.storage.append_upload(upload_id, body_stream(body)).await {
        Ok(_) => {}
        Err(StorageError::UploadNotFound(_)) => return Err(OciError::blob_upload_unknown()),
        Err(e) => return Err(internal_error("failed to append upload", e)),
    }

    let computed_hex = match state.storage.upload_digest(upload_id).await {
        Ok(hex) => hex,
        Err(StorageError::UploadNotFound(_)) => return Err(OciError::blob_upload_unknown()),
        Err(e) => return Err(internal_error("failed to hash upload", e)),
    };
    if computed_hex != digest.hex() {
        return Err(OciError::digest_invalid("upload digest mismatch"));
    }

    let exists = state
        .storage
        .blob_exists(digest.hex())
        .await
        .map_err(|e| internal_error("failed to check blob existence", e))?;
    if exists {
        state
            .storage
            .delete_upload(upload_id)
            .await
            .map_err(|e| internal_error("failed to drop duplicate upload", e))?;
    } else {
        state
            .storage
            .store_blob_from_upload(upload_id, digest.hex())
            .await
            .map_err(|e| internal_error("failed to finalize blob upload", e))?;
    }

    // Record the sighting so GC and the size cache know about the bytes.
    let size = state
        .storage
        .blob_size(digest.hex())
        .await
        .map_err(|e| internal_error("failed to stat stored blob", e))?;
    state
        .metadata
        .upsert_blob(&digest.to_string(), size)
        .await
        .map_err(|e| internal_error("failed to index blob", e))?;

    Ok((
        StatusCode::CREATED,
        [
            (LOCATION.as_str(), blob_location(repo, &digest)),
            (CONTENT_DIGEST_HEADER, digest.to_string()),
        ],
    )
        .into_response())
}

/// `DELETE /v2/<repo>/blobs/uploads/<uuid>` — abort an upload.
pub async fn delete_upload(
    state: &AppState,
    auth: &RegistryAuth,
    repo: &str,
    upload_id: &str,
) -> OciResult<Response> {
    validate_upload_request(auth, repo, Some(upload_id))?;

    state
        .storage
        .delete_upload(upload_id)
        .await
        .map_err(|e| internal_error("failed to delete upload", e))?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `HEAD /v2/<repo>/blobs/<digest>`.
pub async fn head_blob(
    state: &AppState,
    auth: &RegistryAuth,
    repo: &str,
    digest: &str,
) -> OciResult<Response> {
    if !valid_repo_name(repo) {
        return Err(OciError::name_invalid());
    }
    ensure_repo_authorized(auth, repo)?;
    let Ok(digest) = Digest::parse(digest) else {
        return Ok(StatusCode::BAD_REQUEST.into_response());
    };

    let size = match state.storage.blob_size(digest.hex()).await {
        Ok(size) => size,
        Err(StorageError::BlobNotFound(_)) => return Ok(StatusCode::NOT_FOUND.into_response()),
        Err(e) => return Err(internal_error("failed to stat blob", e)),
    };

    Ok((
        StatusCode::OK,
        [
            (CONTENT_DIGEST_HEADER, digest.to_string()),
            (CONTENT_LENGTH.as_str(), size.to_string()),
        ],
    )
        .into_response())
}

/// `GET /v2/<repo>/blobs/<digest>` — stream the blob.
pub async fn get_blob(
    state: &AppState,
    auth: &RegistryAuth,
    repo: &str,
    digest: &str,
) -> OciResult<Response> {
    if !valid_repo_name(repo) {
        return Err(OciError::name_invalid());
    }
    ensure_repo_authorized(auth, repo)?;
    let Ok(digest) = Digest::parse(digest) else {
        return Ok(StatusCode::BAD_REQUEST.into_response());
    };

    let (stream, size) = match state.storage.get_blob(digest.hex()).await {
        Ok(found) => found,
        Err(StorageError::BlobNotFound(_)) => return Ok(StatusCode::NOT_FOUND.into_response()),
        Err(e) => return Err(internal_error("failed to open blob", e)),
    };

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, DEFAULT_BLOB_CONTENT_TYPE)
        .header(CONTENT_DIGEST_HEADER, digest.to_string());
    if size >= 0 {
        response = response.header(CONTENT_LENGTH, size.to_string());
    }
    response
        .body(Body::from_stream(stream))
        .map_err(|e| internal_error("failed to build blob response", e))
}

/// First value of a query parameter, percent-decoded.
pub fn query_value(query: &str, name: &str) -> Option<String> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).ok()?;
    pairs.into_iter().find(|(k, _)| k == name).map(|(_, v)| v)
}
