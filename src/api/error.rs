use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Kinds surfaced to API callers — the read-only `InvalidQuery` half of the
/// node's error taxonomy; the rest of that taxonomy lives on the node side.
#[derive(Debug)]
pub enum ApiError {
    InvalidQuery(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::InvalidQuery(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg, "kind": "InvalidQuery" })),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg })),
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(format!("{err:#}"))
    }
}
