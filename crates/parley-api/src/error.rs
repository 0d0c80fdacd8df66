//! API error type and JSON error bodies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use parley_chat::ChatError;
use parley_queue::QueueError;
use serde::{Deserialize, Serialize};

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code, e.g. `bad_request`.
    pub error: String,
    pub message: String,
}

/// Errors returned by handlers, mapped to HTTP status codes.
#[derive(Debug)]
pub enum ApiError {
    /// 400 - missing or invalid input.
    BadRequest(String),
    /// 404
    NotFound(String),
    /// 502 - the chat transport or assistant failed.
    BadGateway(String),
    /// 503 - the scheduler is shutting down.
    ServiceUnavailable(String),
    /// 500
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "bad_gateway", msg),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorBody {
            error: code.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::InvalidMessage(msg) => ApiError::BadRequest(msg),
            ChatError::Queue(QueueError::ShuttingDown) => {
                ApiError::ServiceUnavailable(QueueError::ShuttingDown.to_string())
            }
            ChatError::Queue(e) => ApiError::BadRequest(e.to_string()),
            e @ (ChatError::Transport(_)
            | ChatError::Assistant(_)
            | ChatError::Transcription(_)) => ApiError::BadGateway(e.to_string()),
            ChatError::Storage(msg) => ApiError::Internal(msg),
        }
    }
}
