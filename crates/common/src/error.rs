use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Common error types used across the application.
#[derive(Debug, Error)]
pub enum AppError {
    /// The queue payload is not a decimal notification id.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Connectivity or transport failure talking to PostgreSQL.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Queue error: {0}")]
    Queue(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Whether redelivering the same queue message could succeed.
    ///
    /// A malformed payload never parses on a second attempt; everything else
    /// is a transient condition from the dispatcher's point of view.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AppError::MalformedPayload(_) | AppError::Config(_))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".to_string()),
            other => AppError::StoreUnavailable(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::MalformedPayload(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::StoreUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            AppError::Queue(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
