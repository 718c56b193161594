//! `/api/system/*`

use axum::Json;
use axum::extract::State;
use tars_host::{SystemInfo, SystemMetrics};

use crate::errors::ApiError;
use crate::server::AppState;

/// GET /api/system/info
pub async fn info(State(state): State<AppState>) -> Result<Json<SystemInfo>, ApiError> {
    state
        .host
        .metrics
        .system_info()
        .await
        .map(Json)
        .map_err(|e| ApiError::from_host("Failed to fetch system info", &e))
}

/// GET /api/system/metrics
pub async fn metrics(State(state): State<AppState>) -> Result<Json<SystemMetrics>, ApiError> {
    state
        .host
        .metrics
        .metrics()
        .await
        .map(Json)
        .map_err(|e| ApiError::from_host("Failed to fetch metrics", &e))
}
