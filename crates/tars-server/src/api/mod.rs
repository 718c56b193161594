//! REST surface under `/api`.
//!
//! Each handler is a thin wrapper over one host collaborator call. Failures
//! come back as [`ApiError`](crate::errors::ApiError) bodies.

pub mod apps;
pub mod containers;
pub mod power;
pub mod processes;
pub mod system;

use axum::Router;
use axum::routing::{get, post};

use crate::server::AppState;

/// Routes relative to `/api`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/system/info", get(system::info))
        .route("/system/metrics", get(system::metrics))
        .route("/processes", get(processes::list))
        .route("/processes/{pid}/kill", post(processes::kill))
        .route("/containers", get(containers::list))
        .route("/containers/{id}/stats", get(containers::stats))
        .route("/containers/{id}/logs", get(containers::logs))
        .route("/containers/{id}/{action}", post(containers::action))
        .route("/apps", get(apps::list))
        .route("/apps/{name}/health", get(apps::health))
        .route("/apps/{name}/{action}", post(apps::action))
        .route("/power/power", post(power::execute))
}
