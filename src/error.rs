//! 统一的 API 错误类型与 JSON 响应。

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::sanitize::sanitize_error;
use crate::session::SessionError;

/// `{ok, message}` 响应体。
#[derive(Debug, Serialize)]
pub struct Outcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            ok: true,
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    TooManyRequests(String),
    PayloadTooLarge(u64),
    Session(SessionError),
    NotFound,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            ApiError::PayloadTooLarge(limit) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                format!(
                    "File too large. Maximum size is {}MB.",
                    limit / (1024 * 1024)
                ),
            ),
            ApiError::Session(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                sanitize_error(err.message()).to_string(),
            ),
            ApiError::NotFound => {
                return (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" })))
                    .into_response();
            }
            ApiError::Internal(msg) => {
                warn!(error = msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    sanitize_error(&msg).to_string(),
                )
            }
        };
        (status, Json(Outcome::failure(message))).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(error: SessionError) -> Self {
        warn!(error = error.message(), "storage session failed");
        ApiError::Session(error)
    }
}

impl From<std::io::Error> for ApiError {
    fn from(error: std::io::Error) -> Self {
        ApiError::Internal(error.to_string())
    }
}

/// 未匹配的路由。
pub async fn not_found() -> ApiError {
    ApiError::NotFound
}
