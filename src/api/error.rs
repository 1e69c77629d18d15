use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

/// Failures surfaced to HTTP callers.
///
/// Validation and upstream image failures carry a human-readable `detail`
/// body; everything else is an opaque 500.
#[derive(Debug)]
pub enum ApiError {
    /// Single-string embedding input over the size limit.
    PayloadTooLarge(&'static str),
    /// Image fetch or decode failed. The cause is deliberately collapsed so
    /// callers see one stable error regardless of what went wrong upstream.
    InvalidImageUrl,
    /// Unexpected inference failure.
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::PayloadTooLarge(detail) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({ "detail": detail })),
            )
                .into_response(),
            ApiError::InvalidImageUrl => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "detail": "Invalid image URL" })),
            )
                .into_response(),
            ApiError::Internal(err) => {
                error!("inference failure: {err:#}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}
