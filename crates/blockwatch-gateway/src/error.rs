//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors returned to HTTP clients.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or invalid input.
    #[error("{0}")]
    BadRequest(String),

    /// The addressed record does not exist.
    #[error("not found")]
    NotFound,

    /// Missing or wrong API key.
    #[error("unauthorized")]
    Unauthorized,

    /// Engine or storage failure.
    #[error("internal error")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(source) = &self {
            tracing::error!(error = source.as_str(), "request failed");
        }
        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<blockwatch_engine::Error> for ApiError {
    fn from(err: blockwatch_engine::Error) -> Self {
        match err {
            blockwatch_engine::Error::InvalidRequest(e) => Self::BadRequest(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<blockwatch_store::Error> for ApiError {
    fn from(err: blockwatch_store::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<blockwatch_store::InvalidRequest> for ApiError {
    fn from(err: blockwatch_store::InvalidRequest) -> Self {
        Self::BadRequest(err.to_string())
    }
}
