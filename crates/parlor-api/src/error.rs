use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use parlor_types::api::ErrorResponse;
use parlor_types::error::ChatError;

/// A failed request: the status to answer with and a message safe to show
/// the client.
#[derive(Debug, Error)]
#[error("{status}: {message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    /// Logs the cause; the client only sees a generic message.
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        error!("Internal error: {}", cause);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Unauthenticated(msg) => Self::new(StatusCode::UNAUTHORIZED, msg),
            ChatError::Forbidden(msg) => Self::new(StatusCode::FORBIDDEN, msg),
            ChatError::NotFound(msg) => Self::new(StatusCode::NOT_FOUND, msg),
            ChatError::InvalidInput(msg) => Self::new(StatusCode::BAD_REQUEST, msg),
            ChatError::Storage(e) => Self::internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            status: "error".into(),
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}
