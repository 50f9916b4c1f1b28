//! Route configuration and Distribution v2 dispatch.
//!
//! Repository names span path segments, which the router's pattern
//! language cannot express, so the whole `/v2` surface funnels through a
//! catch-all handler that parses the path itself.

use crate::auth::{registry_auth, v2_auth_middleware};
use crate::error::OciError;
use crate::handlers::{api_keys, blobs, manifests, registries, token, well_known};
use crate::state::AppState;
use crate::v2::{V2Route, parse_v2_path, v2_relative_path};
use axum::Router;
use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, delete, get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let v2_routes = Router::new()
        .route("/", any(v2_dispatch))
        .route("/{*path}", any(v2_dispatch))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            v2_auth_middleware,
        ));

    let api_routes = Router::new()
        .route(
            "/registries",
            post(registries::add_registry).get(registries::list_registries),
        )
        .route("/registries/exists", get(registries::registry_exists))
        .route("/registries/{id}", get(registries::get_registry))
        .route("/repositories", get(registries::list_repositories))
        .route(
            "/api-keys",
            post(api_keys::create_api_key).get(api_keys::list_api_keys),
        )
        .route("/api-keys/{id}", delete(api_keys::remove_api_key));

    Router::new()
        .nest("/v2", v2_routes)
        .nest("/api/v1", api_routes)
        .route("/.well-known/jwks.json", get(well_known::jwks))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn unsupported_endpoint() -> Response {
    OciError::unsupported(StatusCode::NOT_FOUND, "endpoint not implemented").into_response()
}

fn root_response(method: &Method) -> Response {
    if method == Method::GET {
        StatusCode::OK.into_response()
    } else {
        OciError::unsupported(StatusCode::METHOD_NOT_ALLOWED, "method not allowed").into_response()
    }
}

async fn v2_dispatch(State(state): State<AppState>, req: Request) -> Response {
    let relative = v2_relative_path(req.uri().path()).to_string();
    let method = req.method().clone();
    let query = req.uri().query().unwrap_or("").to_string();

    let Some(route) = parse_v2_path(&relative) else {
        return unsupported_endpoint();
    };

    match route {
        V2Route::Root => root_response(&method),

        V2Route::Token => {
            if method == Method::GET {
                let headers = req.headers().clone();
                token::get_token(&state, &headers, &query).await
            } else {
                token::method_not_allowed()
            }
        }

        V2Route::StartUpload { repo } => {
            if method != Method::POST {
                return unsupported_endpoint();
            }
            let auth = match registry_auth(&req) {
                Ok(auth) => auth,
                Err(e) => return e.into_response(),
            };
            blobs::start_upload(&state, &auth, &repo)
                .await
                .unwrap_or_else(IntoResponse::into_response)
        }

        V2Route::Upload { repo, upload_id } => {
            let auth = match registry_auth(&req) {
                Ok(auth) => auth,
                Err(e) => return e.into_response(),
            };
            if method == Method::PATCH {
                blobs::patch_upload(&state, &auth, &repo, &upload_id, req.into_body())
                    .await
                    .unwrap_or_else(IntoResponse::into_response)
            } else if method == Method::PUT {
                blobs::put_upload(&state, &auth, &repo, &upload_id, &query, req.into_body())
                    .await
                    .unwrap_or_else(IntoResponse::into_response)
            } else if method == Method::DELETE {
                blobs::delete_upload(&state, &auth, &repo, &upload_id)
                    .await
                    .unwrap_or_else(IntoResponse::into_response)
            } else {
                unsupported_endpoint()
            }
        }

        V2Route::Blob { repo, digest } => {
            let auth = match registry_auth(&req) {
                Ok(auth) => auth,
                Err(e) => return e.into_response(),
            };
            if method == Method::HEAD {
                blobs::head_blob(&state, &auth, &repo, &digest)
                    .await
                    .unwrap_or_else(IntoResponse::into_response)
            } else if method == Method::GET {
                blobs::get_blob(&state, &auth, &repo, &digest)
                    .await
                    .unwrap_or_else(IntoResponse::into_response)
            } else {
                unsupported_endpoint()
            }
        }

        V2Route::Manifest { repo, reference } => {
            let auth = match registry_auth(&req) {
                Ok(auth) => auth,
                Err(e) => return e.into_response(),
            };
            if method == Method::PUT {
                let content_type = req
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                manifests::put_manifest(
                    &state,
                    &auth,
                    &repo,
                    &reference,
                    &content_type,
                    req.into_body(),
                )
                .await
                .unwrap_or_else(IntoResponse::into_response)
            } else if method == Method::HEAD {
                manifests::head_manifest(&state, &auth, &repo, &reference)
                    .await
                    .unwrap_or_else(IntoResponse::into_response)
            } else if method == Method::GET {
                manifests::get_manifest(&state, &auth, &repo, &reference)
                    .await
                    .unwrap_or_else(IntoResponse::into_response)
            } else {
                unsupported_endpoint()
            }
        }
    }
}
