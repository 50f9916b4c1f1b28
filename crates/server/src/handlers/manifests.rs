//! Manifest handlers.

use crate::auth::{RegistryAuth, ensure_repo_authorized, resolve_registry_id};
use crate::error::{OciError, OciResult, internal_error};
use crate::state::AppState;
use axum::body::Body;
use axum::http::StatusCode;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use axum::response::{IntoResponse, Response};
use berth_core::manifest::manifest_content_type;
use berth_core::name::{repo_leaf, valid_reference, valid_repo_name};
use berth_core::{Digest, ImageManifest, MAX_MANIFEST_SIZE};
use berth_metadata::repos::{ManifestIndexRepo, UpsertManifestIndexArgs};
use berth_storage::BlobStore;

const CONTENT_DIGEST_HEADER: &str = "Docker-Content-Digest";

/// `PUT /v2/<repo>/manifests/<reference>`.
///
/// Every blob the manifest references must already be content-addressed in
/// the store; only then is the index updated, atomically, with both the
/// URL reference and the manifest's own digest as references.
pub async fn put_manifest(
    state: &AppState,
    auth: &RegistryAuth,
    repo: &str,
    reference: &str,
    content_type: &str,
    body: Body,
) -> OciResult<Response> {
    if !valid_repo_name(repo) {
        return Err(OciError::name_invalid());
    }
    ensure_repo_authorized(auth, repo)?;
    if !valid_reference(reference) {
        return Err(OciError::manifest_invalid("invalid manifest reference"));
    }

    let manifest_bytes = axum::body::to_bytes(body, MAX_MANIFEST_SIZE)
        .await
        .map_err(|_| OciError::manifest_invalid("failed to read manifest body"))?;

    let manifest = ImageManifest::parse(&manifest_bytes)
        .map_err(|_| OciError::manifest_invalid("invalid manifest JSON"))?;
    let raw_digests = manifest.blob_digests();
    if raw_digests.is_empty() {
        return Err(OciError::manifest_invalid(
            "manifest must reference config/layer blobs",
        ));
    }

    let mut blob_digests = Vec::with_capacity(raw_digests.len());
    for raw in raw_digests {
        let digest = Digest::parse(raw)
            .map_err(|_| OciError::manifest_invalid("manifest references invalid digest"))?;
        let normalized = digest.to_string();
        if !blob_digests.contains(&normalized) {
            blob_digests.push(normalized);
        }

        let exists = state
            .storage
            .blob_exists(digest.hex())
            .await
            .map_err(|e| internal_error("failed to validate referenced blob", e))?;
        if !exists {
            return Err(OciError::manifest_blob_unknown());
        }
    }

    let manifest_digest = Digest::compute(&manifest_bytes).to_string();
    let registry_id = resolve_registry_id(state, repo).await?;
    let content_type = manifest_content_type(content_type).to_string();

    let mut references = vec![reference.to_string()];
    if reference != manifest_digest {
        references.push(manifest_digest.clone());
    }

    state
        .metadata
        .upsert_manifest_index(&UpsertManifestIndexArgs {
            registry_id,
            repository: repo_leaf(repo).to_string(),
            manifest_digest: manifest_digest.clone(),
            manifest_body: manifest_bytes.to_vec(),
            content_type,
            references,
            blob_digests,
        })
        .await
        .map_err(|e| internal_error("failed to store manifest", e))?;

    Ok((
        StatusCode::CREATED,
        [
            (CONTENT_DIGEST_HEADER, manifest_digest),
            (
                LOCATION.as_str(),
                format!("/v2/{repo}/manifests/{reference}"),
            ),
        ],
    )
        .into_response())
}

/// `GET /v2/<repo>/manifests/<reference>`.
pub async fn get_manifest(
    state: &AppState,
    auth: &RegistryAuth,
    repo: &str,
    reference: &str,
) -> OciResult<Response> {
    let (body, content_type, digest) = match load_manifest(state, auth, repo, reference).await? {
        Loaded::Found(found) => found,
        Loaded::Status(status) => return Ok(status.into_response()),
    };

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE.to_string(), content_type),
            (CONTENT_DIGEST_HEADER.to_string(), digest),
        ],
        body,
    )
        .into_response())
}

/// `HEAD /v2/<repo>/manifests/<reference>`.
pub async fn head_manifest(
    state: &AppState,
    auth: &RegistryAuth,
    repo: &str,
    reference: &str,
) -> OciResult<Response> {
    let (body, content_type, digest) = match load_manifest(state, auth, repo, reference).await? {
        Loaded::Found(found) => found,
        Loaded::Status(status) => return Ok(status.into_response()),
    };

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE.to_string(), content_type),
            (CONTENT_DIGEST_HEADER.to_string(), digest),
            (CONTENT_LENGTH.to_string(), body.len().to_string()),
        ],
    )
        .into_response())
}

enum Loaded {
    Found((Vec<u8>, String, String)),
    Status(StatusCode),
}

async fn load_manifest(
    state: &AppState,
    auth: &RegistryAuth,
    repo: &str,
    reference: &str,
) -> OciResult<Loaded> {
    if !valid_repo_name(repo) {
        return Ok(Loaded::Status(StatusCode::BAD_REQUEST));
    }
    ensure_repo_authorized(auth, repo)?;
    if !valid_reference(reference) {
        return Ok(Loaded::Status(StatusCode::BAD_REQUEST));
    }

    let registry_id = resolve_registry_id(state, repo).await?;

    let found = state
        .metadata
        .get_manifest_by_reference(registry_id, repo_leaf(repo), reference)
        .await
        .map_err(|e| internal_error("failed to load manifest", e))?;

    match found {
        Some((body, content_type, digest)) => Ok(Loaded::Found((
            body,
            manifest_content_type(&content_type).to_string(),
            digest,
        ))),
        None => Ok(Loaded::Status(StatusCode::NOT_FOUND)),
    }
}
