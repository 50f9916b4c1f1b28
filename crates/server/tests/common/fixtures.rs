//! Shared fixtures and request helpers.

use crate::common::server::TestServer;
use axum::body::{Body, Bytes};
use axum::http::header::AUTHORIZATION;
use axum::http::{Request, Response, StatusCode};
use base64::Engine;
use berth_core::Permission;
use berth_core::apikey::generate_api_key;
use berth_metadata::repos::{
    AddApiKeyArgs, AddApiKeyScope, AddRegistryWithKeyArgs, ApiKeyRepo, RegistryRepo, UserRepo,
};
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

/// A registry seeded directly through the metadata store.
#[allow(dead_code)]
pub struct SeededRegistry {
    pub registry_id: Uuid,
    pub user_id: Uuid,
    pub org_id: Uuid,
    /// The default registry-wide admin key.
    pub admin_key: String,
}

/// Create a user, a registry named `name`, and its default admin key.
#[allow(dead_code)]
pub async fn seed_registry(server: &TestServer, name: &str) -> SeededRegistry {
    let user = server
        .metadata
        .ensure_user(&format!("idp|{name}"), &format!("{name}@example.test"))
        .await
        .expect("ensure_user failed");

    let (full_key, prefix) = generate_api_key();
    let encrypted = server.cipher().encrypt(&full_key).expect("encrypt failed");

    let (registry, _key) = server
        .metadata
        .add_registry_with_key(&AddRegistryWithKeyArgs {
            org_id: user.org_id,
            name: name.to_string(),
            user_id: user.id,
            key_name: "default".to_string(),
            secret_encrypted: encrypted,
            prefix,
        })
        .await
        .expect("add_registry_with_key failed");

    SeededRegistry {
        registry_id: registry.id,
        user_id: user.id,
        org_id: user.org_id,
        admin_key: full_key,
    }
}

/// Add a registry-wide key with the given permission to a seeded registry.
#[allow(dead_code)]
pub async fn seed_key(
    server: &TestServer,
    seeded: &SeededRegistry,
    key_name: &str,
    permission: Permission,
) -> String {
    let (full_key, prefix) = generate_api_key();
    let encrypted = server.cipher().encrypt(&full_key).expect("encrypt failed");

    server
        .metadata
        .add_api_key(&AddApiKeyArgs {
            user_id: seeded.user_id,
            key_name: key_name.to_string(),
            secret_encrypted: encrypted,
            prefix,
            scopes: vec![AddApiKeyScope {
                registry_id: seeded.registry_id,
                repository_id: None,
                permission,
            }],
        })
        .await
        .expect("add_api_key failed");

    full_key
}

/// Basic auth header value.
#[allow(dead_code)]
pub fn basic_auth(username: &str, password: &str) -> String {
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
    format!("Basic {encoded}")
}

/// Send a request through the router.
#[allow(dead_code)]
pub async fn send(server: &TestServer, request: Request<Body>) -> Response<Body> {
    server
        .router
        .clone()
        .oneshot(request)
        .await
        .expect("router call failed")
}

/// Collect a response body.
#[allow(dead_code)]
pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("failed to collect body")
        .to_bytes()
}

/// Collect and parse a JSON response body.
#[allow(dead_code)]
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).expect("response body is not JSON")
}

/// Mint a registry token via `GET /v2/token`. Returns the raw response.
#[allow(dead_code)]
pub async fn token_response(
    server: &TestServer,
    username: &str,
    key: &str,
    service: Option<&str>,
    scopes: &[&str],
) -> Response<Body> {
    let mut uri = "/v2/token?".to_string();
    if let Some(service) = service {
        uri.push_str(&format!("service={service}&"));
    }
    for scope in scopes {
        uri.push_str(&format!("scope={scope}&"));
    }
    let uri = uri.trim_end_matches(['&', '?']).to_string();

    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .header(AUTHORIZATION, basic_auth(username, key))
        .body(Body::empty())
        .unwrap();
    send(server, request).await
}

/// Mint a bearer token for the default test service, panicking on failure.
#[allow(dead_code)]
pub async fn bearer_token(server: &TestServer, username: &str, key: &str, scopes: &[&str]) -> String {
    let response = token_response(server, username, key, None, scopes).await;
    assert_eq!(response.status(), StatusCode::OK, "token mint failed");
    let json = body_json(response).await;
    json["token"].as_str().expect("token missing").to_string()
}

/// Build an authorized registry request.
#[allow(dead_code)]
pub fn v2_request(method: &str, uri: &str, token: &str, body: Body) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(body)
        .unwrap()
}

/// Push a blob monolithically (`POST` then `PUT?digest=` with the body).
/// Returns the digest string.
#[allow(dead_code)]
pub async fn push_blob(server: &TestServer, token: &str, repo: &str, bytes: &[u8]) -> String {
    let response = send(
        server,
        v2_request("POST", &format!("/v2/{repo}/blobs/uploads/"), token, Body::empty()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED, "upload start failed");
    let location = response
        .headers()
        .get("Location")
        .expect("Location header missing")
        .to_str()
        .unwrap()
        .to_string();

    let digest = berth_core::Digest::compute(bytes).to_string();
    let response = send(
        server,
        v2_request(
            "PUT",
            &format!("{location}?digest={digest}"),
            token,
            Body::from(bytes.to_vec()),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED, "upload finalize failed");
    digest
}

/// Build a minimal image manifest body. `note` lands in an annotation so
/// two manifests over the same blobs can have distinct digests.
#[allow(dead_code)]
pub fn manifest_json(config_digest: &str, layer_digests: &[&str], note: &str) -> Vec<u8> {
    let layers: Vec<serde_json::Value> = layer_digests
        .iter()
        .map(|digest| serde_json::json!({"mediaType": "application/vnd.oci.image.layer.v1.tar", "digest": digest}))
        .collect();
    serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {"mediaType": "application/vnd.oci.image.config.v1+json", "digest": config_digest},
        "layers": layers,
        "annotations": {"test.note": note},
    }))
    .unwrap()
}

/// `PUT` a manifest body at a reference.
#[allow(dead_code)]
pub async fn put_manifest(
    server: &TestServer,
    token: &str,
    repo: &str,
    reference: &str,
    body: Vec<u8>,
) -> Response<Body> {
    let request = Request::builder()
        .method("PUT")
        .uri(format!("/v2/{repo}/manifests/{reference}"))
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .header("Content-Type", "application/vnd.oci.image.manifest.v1+json")
        .body(Body::from(body))
        .unwrap();
    send(server, request).await
}
