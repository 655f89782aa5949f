//! HTTP error type and mapping from [`EffectError`] to status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::error::EffectError;

/// Errors returned by the `/api/prompts` handlers.
///
/// Every variant renders as `{"ok": false, "error": "...", ...}` so clients
/// can treat all failures uniformly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Not found")]
    NotFound,

    #[error("{message}")]
    Validation { field: String, message: String },

    #[error("Catalog '{catalog}' is read-only")]
    ReadOnly { catalog: String },

    #[error("{message}")]
    BadRequest { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Validation { .. } | ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::ReadOnly { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Storage { .. } | ApiError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get the error type name for the response body.
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::NotFound => "NotFound",
            ApiError::Validation { .. } => "ValidationFailed",
            ApiError::ReadOnly { .. } => "ReadOnlyCatalog",
            ApiError::BadRequest { .. } => "BadRequest",
            ApiError::Storage { .. } => "StorageError",
            ApiError::Internal { .. } => "InternalError",
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal {
            message: message.into(),
        }
    }
}

/// Body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub error: String,
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let field = match &self {
            ApiError::Validation { field, .. } => Some(field.clone()),
            _ => None,
        };
        let body = ErrorBody {
            ok: false,
            error: self.to_string(),
            error_type: self.error_type().to_string(),
            field,
        };
        (status, Json(body)).into_response()
    }
}

impl From<EffectError> for ApiError {
    fn from(err: EffectError) -> Self {
        match err {
            EffectError::NotFound(_) => ApiError::NotFound,
            EffectError::Validation { field, message } => ApiError::Validation { field, message },
            EffectError::ReadOnlyCatalog(catalog) => ApiError::ReadOnly { catalog },
            EffectError::Json(e) => ApiError::BadRequest {
                message: format!("Invalid request body: {}", e),
            },
            EffectError::CorruptCatalog { path, message } => ApiError::Storage {
                message: format!("corrupt document {}: {}", path.display(), message),
            },
            EffectError::Io(e) => ApiError::Storage {
                message: format!("IO error: {}", e),
            },
            EffectError::Storage(message) => ApiError::Storage { message },
            other => ApiError::internal(other.to_string()),
        }
    }
}
