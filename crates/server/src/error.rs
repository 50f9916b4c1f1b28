//! Wire error types: OCI registry errors and management API errors.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// One entry of an OCI error body.
#[derive(Debug, Serialize)]
pub struct OciErrorEntry {
    pub code: String,
    pub message: String,
}

/// The OCI wire error body: `{"errors":[{code,message}]}`.
#[derive(Debug, Serialize)]
pub struct OciErrorBody {
    pub errors: Vec<OciErrorEntry>,
}

/// An OCI registry error with its HTTP status and wire code.
#[derive(Debug)]
pub struct OciError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl OciError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "authentication required",
        )
    }

    pub fn denied(status: StatusCode) -> Self {
        Self::new(status, "DENIED", "requested access to the resource is denied")
    }

    pub fn name_invalid() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "NAME_INVALID", "invalid repository name")
    }

    pub fn manifest_invalid(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "MANIFEST_INVALID", message)
    }

    pub fn manifest_blob_unknown() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "MANIFEST_BLOB_UNKNOWN",
            "referenced blob not found",
        )
    }

    pub fn blob_upload_invalid() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "BLOB_UPLOAD_INVALID",
            "invalid upload uuid",
        )
    }

    pub fn blob_upload_unknown() -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "BLOB_UPLOAD_UNKNOWN",
            "upload not found",
        )
    }

    pub fn digest_invalid(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "DIGEST_INVALID", message)
    }

    pub fn unsupported(status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(status, "UNSUPPORTED", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "UNKNOWN", message)
    }
}

impl IntoResponse for OciError {
    fn into_response(self) -> Response {
        let body = OciErrorBody {
            errors: vec![OciErrorEntry {
                code: self.code.to_string(),
                message: self.message,
            }],
        };
        (self.status, Json(body)).into_response()
    }
}

/// Result type for OCI registry handlers.
pub type OciResult<T> = std::result::Result<T, OciError>;

/// Log-and-wrap helper for internal failures on the registry surface.
pub fn internal_error(context: &str, err: impl std::fmt::Display) -> OciError {
    tracing::error!(error = %err, "{context}");
    OciError::internal(context.to_string())
}

/// Management API error body: `{"error": …}`.
#[derive(Debug, Serialize)]
struct ApiErrorBody {
    error: String,
}

/// Management API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("internal server error")]
    Internal(anyhow::Error),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(err) = &self {
            tracing::error!(error = ?err, "management API internal error");
        }
        let body = ApiErrorBody {
            error: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<berth_metadata::MetadataError> for ApiError {
    fn from(err: berth_metadata::MetadataError) -> Self {
        use berth_metadata::MetadataError;
        match err {
            MetadataError::NotFound(what) => Self::NotFound(what),
            MetadataError::Conflict(what) => Self::Conflict(what),
            MetadataError::ScopeConflict(_) => Self::Conflict("duplicate scope".to_string()),
            other => Self::Internal(other.into()),
        }
    }
}

/// Result type for management API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
