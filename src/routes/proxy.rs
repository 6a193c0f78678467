use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::routes::api_error;
use crate::services::stream_forwarder::{apply_cors, preflight_response};
use crate::AppState;

/// Query parameters for the stream proxy
#[derive(Deserialize)]
pub struct StreamQuery {
    pub url: String,
}

/// GET /api/stream?url=<encoded>
/// Relays a channel's stream: manifests buffered, media chunked.
/// Upstream failures answer 502, proxy failures 500. Errors carry the same
/// CORS headers as relayed streams.
pub async fn stream_proxy(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Response {
    match state.forwarder.forward(&query.url, &headers).await {
        Ok(response) => response,
        Err(e) => {
            let mut response = api_error(e.status_code(), e).into_response();
            apply_cors(response.headers_mut());
            response
        }
    }
}

/// OPTIONS /api/stream
pub async fn stream_preflight() -> Response {
    preflight_response()
}
