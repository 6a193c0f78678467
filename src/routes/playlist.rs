use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::routes::{api_error, ApiError};
use crate::AppState;

#[derive(Serialize)]
pub struct RefreshResponse {
    pub ok: bool,
    pub message: String,
    pub channels: usize,
    pub programmes: usize,
}

/// GET /api/channels - Channel list from the M3U source (fetched on first use)
pub async fn get_channels(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state
        .cache
        .channels_or_fetch(&state.fetcher, &state.config)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Error obteniendo canales: {}", e)))?;

    Ok(Json(snapshot.value.clone()))
}

/// GET /api/epg - Programme guide keyed by channel id (fetched on first use)
pub async fn get_epg(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state
        .cache
        .guide_or_fetch(&state.fetcher, &state.config)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Error obteniendo EPG: {}", e)))?;

    Ok(Json(snapshot.value.clone()))
}

/// POST /api/refresh - Refetch playlist and guide, replacing both snapshots
pub async fn refresh(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let summary = state
        .cache
        .refresh_all(&state.fetcher, &state.config)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Error refrescando datos: {}", e)))?;

    Ok(Json(RefreshResponse {
        ok: true,
        message: "Datos actualizados correctamente".to_string(),
        channels: summary.channels,
        programmes: summary.programmes,
    }))
}
