use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use drip_core::error::CoreError;
use drip_sequencer::{EngineError, StoreError};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] and [`EngineError`] and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `drip_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A scheduler operation failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The addressed resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

const INTERNAL_MESSAGE: &str = "An internal error occurred";

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::UnknownSequence(id) => (
                    StatusCode::BAD_REQUEST,
                    "UNKNOWN_SEQUENCE",
                    format!("Unknown sequence: {id}"),
                ),
                // The reason is logged, never returned.
                CoreError::Unauthorized(reason) => {
                    tracing::debug!(reason = %reason, "Rejected unauthorized request");
                    (
                        StatusCode::UNAUTHORIZED,
                        "UNAUTHORIZED",
                        "Unauthorized".to_string(),
                    )
                }
            },

            // --- Scheduler errors ---
            AppError::Engine(engine) => match engine {
                EngineError::InvalidInput(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                EngineError::UnknownSequence(id) => (
                    StatusCode::BAD_REQUEST,
                    "UNKNOWN_SEQUENCE",
                    format!("Unknown sequence: {id}"),
                ),
                EngineError::Storage(StoreError::ActiveConflict { .. }) => (
                    StatusCode::CONFLICT,
                    "CONFLICT",
                    "Enrollment is being modified concurrently, retry".to_string(),
                ),
                EngineError::Storage(err) => {
                    tracing::error!(error = %err, "Storage error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        INTERNAL_MESSAGE.to_string(),
                    )
                }
            },

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
