//! The token endpoint: Basic-authenticated API-key credentials in,
//! scope-bounded bearer tokens out.

use crate::auth::{
    BasicAuthError, authenticate_registry_basic, basic_unauthorized, service_for_request,
};
use crate::error::{OciError, internal_error};
use crate::state::AppState;
use axum::Json;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use berth_core::access::{grant_token_scopes, parse_requested_scopes};
use serde::Serialize;
use time::format_description::well_known::Rfc3339;

/// Token endpoint response. `access_token` duplicates `token` for clients
/// of either vintage.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub access_token: String,
    pub expires_in: i64,
    pub issued_at: String,
}

/// `GET /v2/token?service=<s>&scope=<s1>&scope=<s2>…`
pub async fn get_token(state: &AppState, headers: &HeaderMap, query: &str) -> Response {
    let auth = match authenticate_registry_basic(state, headers).await {
        Ok(auth) => auth,
        Err(BasicAuthError::Unauthorized) => return basic_unauthorized(),
        Err(BasicAuthError::Internal(e)) => {
            return internal_error("token endpoint failed", e).into_response();
        }
    };

    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).unwrap_or_default();
    let service = pairs
        .iter()
        .find(|(k, _)| k == "service")
        .map(|(_, v)| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| service_for_request(state, headers));
    let raw_scopes: Vec<String> = pairs
        .into_iter()
        .filter(|(k, _)| k == "scope")
        .map(|(_, v)| v)
        .collect();

    let requested = parse_requested_scopes(&raw_scopes);
    let granted = grant_token_scopes(auth.registry_id, &auth.namespace, &auth.scopes, &requested);

    let (token, issued_at, expires_at) =
        match state.authority.issue(&auth.namespace, &service, granted) {
            Ok(issued) => issued,
            Err(e) => return internal_error("failed to issue token", e).into_response(),
        };

    let issued_at_text = match issued_at.format(&Rfc3339) {
        Ok(text) => text,
        Err(e) => return internal_error("failed to format issue time", e).into_response(),
    };

    Json(TokenResponse {
        access_token: token.clone(),
        token,
        expires_in: (expires_at - issued_at).whole_seconds(),
        issued_at: issued_at_text,
    })
    .into_response()
}

/// Non-GET methods on the token path.
pub fn method_not_allowed() -> Response {
    OciError::unsupported(
        axum::http::StatusCode::METHOD_NOT_ALLOWED,
        "method not allowed",
    )
    .into_response()
}
