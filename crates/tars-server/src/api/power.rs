//! `/api/power`

use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use serde_json::{Value, json};
use tars_host::PowerAction;
use tracing::warn;

use crate::errors::ApiError;
use crate::server::AppState;

/// Body for POST /api/power/power.
#[derive(Debug, Deserialize)]
pub struct PowerRequest {
    /// `reboot` or `shutdown`.
    pub action: String,
}

/// POST /api/power/power
pub async fn execute(
    State(state): State<AppState>,
    Json(body): Json<PowerRequest>,
) -> Result<Json<Value>, ApiError> {
    let action: PowerAction = body
        .action
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid power action"))?;
    warn!(?action, "power action requested");
    let message = state
        .host
        .power
        .execute(action)
        .await
        .map_err(|e| ApiError::from_host("Power action failed", &e))?;
    Ok(Json(json!({ "status": "ok", "message": message })))
}
