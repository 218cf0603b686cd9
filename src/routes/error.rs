//! API error type and its mapping to HTTP status and JSON body.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;
use thiserror::Error;
use tracing::error;

// ---

/// Errors a dashboard handler can answer with.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or unknown user")]
    Unauthorized,

    #[error("vessel {0} is not accessible")]
    Forbidden(i64),

    #[error("{0}")]
    BadRequest(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(e) => {
                error!("Dashboard query failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        // store details stay in the log
        let message = match &self {
            ApiError::Store(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
