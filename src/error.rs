// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    // 404 Not Found
    #[error("not found: {0}")]
    NotFound(String),

    // 403 Forbidden: the actor does not own the resource.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    // 401 Unauthorized: missing or invalid bearer token.
    #[error("authentication required: {0}")]
    AuthError(String),

    // 400 Bad Request
    #[error("validation failed: {0}")]
    Validation(String),

    // 409 Conflict (unique collision on a non-idempotent write)
    #[error("conflict: {0}")]
    Conflict(String),

    // 502 Bad Gateway: the remote store failed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    // 499 Client Closed Request
    #[error("request cancelled")]
    Cancelled,

    // 500 Internal Server Error
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::AuthError(_) => "AUTH_REQUIRED",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Conflict(_) => "CONFLICT",
            AppError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            AppError::Cancelled => "CANCELLED",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::FORBIDDEN,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::StoreUnavailable(_) => StatusCode::BAD_GATEWAY,
            // Non-standard, but widely understood.
            AppError::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT)
            }
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into the `{ success, message, code }` envelope.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = match self {
            AppError::Internal(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                "Internal Server Error".to_string()
            }
            AppError::StoreUnavailable(msg) => {
                tracing::error!("Store unavailable: {}", msg);
                "Upstream store unavailable".to_string()
            }
            AppError::Cancelled => "Request cancelled".to_string(),
            AppError::NotFound(msg)
            | AppError::Unauthorized(msg)
            | AppError::AuthError(msg)
            | AppError::Validation(msg)
            | AppError::Conflict(msg) => msg,
        };

        let body = Json(json!({
            "success": false,
            "message": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

/// Maps adapter failures onto the typed kinds surfaced to clients.
/// Allows using `?` operator on store calls.
impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        if err.is_duplicate() {
            return AppError::Conflict(err.to_string());
        }
        match err {
            StoreError::Cancelled => AppError::Cancelled,
            StoreError::Unavailable(msg) => AppError::StoreUnavailable(msg),
            StoreError::Decode(msg) => AppError::Internal(msg),
            StoreError::Api {
                status: 404,
                message,
                ..
            } => AppError::NotFound(message),
            StoreError::Api {
                status: 401 | 403,
                message,
                ..
            } => AppError::StoreUnavailable(format!("store refused credentials: {}", message)),
            StoreError::Api { message, .. } => AppError::Validation(message),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}
