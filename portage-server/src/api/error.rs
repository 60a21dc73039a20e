//! API Error Handling
//!
//! Unified error type and response conversion for the HTTP surface.
//! Every error body is the `{"error": message}` shape clients poll for.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound,
    BadRequest(String),
    UnsupportedMediaType(String),
    /// A conversion finished with an error; surfaced on result fetch
    JobFailed(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::UnsupportedMediaType(msg) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, msg),
            ApiError::JobFailed(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::InternalError(msg) => {
                tracing::error!("internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        ApiError::BadRequest(format!("error parsing form: {err}"))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
