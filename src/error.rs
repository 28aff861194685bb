use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

/// The single error enum translated to HTTP responses; mirrors spec.md §7's
/// error kinds (validation, auth, state conflict, invariant, transient,
/// fatal). Idempotent-skip is not represented here — it is a success path,
/// not an error.
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    Unauthorized,
    Forbidden,
    NotFound(String),
    StateConflict(String),
    Invariant(String),
    Transient(String),
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::StateConflict(_) => StatusCode::CONFLICT,
            AppError::Invariant(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Forbidden => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::StateConflict(_) => "STATE_CONFLICT",
            AppError::Invariant(_) => "INVARIANT_VIOLATION",
            AppError::Transient(_) => "TRANSIENT_UPSTREAM",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the sanitized message shown to clients.
    /// Internal details are logged server-side only.
    fn public_message(&self) -> String {
        match self {
            AppError::Validation(msg) => msg.clone(),
            AppError::Unauthorized => "unauthorized".into(),
            AppError::Forbidden => "forbidden".into(),
            AppError::NotFound(what) => format!("{what} not found"),
            AppError::StateConflict(_) => "operation not valid for current state".into(),
            AppError::Invariant(_) => "operation would violate an accounting invariant".into(),
            AppError::Transient(_) => "upstream processor unavailable, retry later".into(),
            AppError::Internal(_) => "internal error".into(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "validation: {msg}"),
            AppError::Unauthorized => write!(f, "unauthorized"),
            AppError::Forbidden => write!(f, "forbidden"),
            AppError::NotFound(what) => write!(f, "not found: {what}"),
            AppError::StateConflict(msg) => write!(f, "state conflict: {msg}"),
            AppError::Invariant(msg) => write!(f, "invariant violated: {msg}"),
            AppError::Transient(msg) => write!(f, "transient upstream failure: {msg}"),
            AppError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full error server-side for debugging.
        // SECURITY: Never expose internal details to clients.
        match &self {
            AppError::Invariant(_) | AppError::Internal(_) => {
                error!(error = %self, "request failed");
            }
            AppError::Transient(_) => {
                tracing::warn!(error = %self, "transient upstream failure");
            }
            _ => {}
        }

        let status = self.status_code();
        let body = json!({
            "error": self.public_message(),
            "code": self.error_code(),
        });
        (status, axum::Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Internal(e.to_string())
    }
}
