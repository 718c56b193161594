//! `/api/containers`

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};
use tars_host::{ContainerAction, ContainerInfo, ContainerStats};

use crate::errors::ApiError;
use crate::server::AppState;
use crate::websocket::protocol::DEFAULT_LOG_TAIL;

/// Query for GET /api/containers/{id}/logs.
#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    /// Lines from the end (default 100).
    pub tail: Option<usize>,
}

/// GET /api/containers
pub async fn list(State(state): State<AppState>) -> Json<Vec<ContainerInfo>> {
    Json(state.host.containers.list_containers().await)
}

/// GET /api/containers/{id}/stats
pub async fn stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ContainerStats>, ApiError> {
    state
        .host
        .containers
        .stats(&id)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_host("Failed to fetch container stats", &e))
}

/// GET /api/containers/{id}/logs?tail=N
pub async fn logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<LogsQuery>,
) -> Result<Json<Value>, ApiError> {
    let tail = q.tail.unwrap_or(DEFAULT_LOG_TAIL);
    let logs = state
        .host
        .containers
        .logs(&id, tail)
        .await
        .map_err(|e| ApiError::from_host("Failed to fetch container logs", &e))?;
    Ok(Json(json!({ "logs": logs })))
}

/// POST /api/containers/{id}/{action}
pub async fn action(
    State(state): State<AppState>,
    Path((id, action)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let action: ContainerAction = action
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid action. Use start, stop, or restart"))?;
    let message = state
        .host
        .containers
        .run_action(&id, action)
        .await
        .map_err(|e| ApiError::from_host(&format!("Failed to {action} container"), &e))?;
    Ok(Json(json!({ "message": message })))
}
