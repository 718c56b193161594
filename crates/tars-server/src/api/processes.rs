//! `/api/processes`

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tars_host::ProcessInfo;
use tracing::info;

use crate::errors::ApiError;
use crate::server::AppState;

/// Query for GET /api/processes.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Maximum rows (default from server config).
    pub limit: Option<usize>,
}

/// GET /api/processes?limit=N
pub async fn list(State(state): State<AppState>, Query(q): Query<ListQuery>) -> Json<Vec<ProcessInfo>> {
    let limit = q.limit.unwrap_or(state.config.default_process_limit);
    Json(state.host.processes.list_processes(limit).await)
}

/// POST /api/processes/{pid}/kill
pub async fn kill(State(state): State<AppState>, Path(pid): Path<u32>) -> Result<Json<Value>, ApiError> {
    match state.host.processes.kill_process(pid).await {
        Ok(true) => {
            info!(pid, "process terminated via REST");
            Ok(Json(json!({ "status": "ok", "message": format!("Process {pid} terminated") })))
        }
        Ok(false) => Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to kill process",
        )),
        Err(e) => Err(ApiError::from_host("Failed to kill process", &e)),
    }
}
