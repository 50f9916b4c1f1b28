//! JWKS publication.

use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::header::CACHE_CONTROL;
use axum::response::{IntoResponse, Response};

/// `GET /.well-known/jwks.json` — the registry's token verification key.
pub async fn jwks(State(state): State<AppState>) -> Response {
    (
        [(CACHE_CONTROL, "public, max-age=300")],
        Json(state.authority.keypair().jwks()),
    )
        .into_response()
}
