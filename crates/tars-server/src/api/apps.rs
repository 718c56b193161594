//! `/api/apps`

use axum::Json;
use axum::extract::{Path, State};
use serde_json::{Value, json};
use tars_host::{AppHealth, AppSummary, ContainerAction};

use crate::errors::ApiError;
use crate::server::AppState;

/// GET /api/apps
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<AppSummary>>, ApiError> {
    state
        .host
        .apps
        .list_apps()
        .await
        .map(Json)
        .map_err(|e| ApiError::from_host("Failed to get TARS apps", &e))
}

/// POST /api/apps/{name}/{action}
pub async fn action(
    State(state): State<AppState>,
    Path((name, action)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let action: ContainerAction = action
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid action. Use start, stop, or restart"))?;
    let message = state
        .host
        .apps
        .run_app_action(&name, action)
        .await
        .map_err(|e| ApiError::from_host(&format!("Failed to {action} application"), &e))?;
    Ok(Json(json!({ "message": message })))
}

/// GET /api/apps/{name}/health
pub async fn health(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<AppHealth>, ApiError> {
    state
        .host
        .apps
        .app_health(&name)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_host("Failed to get app health", &e))
}
