pub mod health;
pub mod playlist;
pub mod proxy;

use axum::{http::StatusCode, Json};

/// Error shape returned by every JSON route
pub type ApiError = (StatusCode, Json<serde_json::Value>);

pub(crate) fn api_error(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.to_string() })))
}
