//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

use crate::websocket::registry::SessionRegistry;

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"draining"` once shutdown has started.
    pub status: &'static str,
    /// Service name.
    pub service: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live WebSocket sessions.
    pub connections: usize,
    /// Topics with at least one subscriber, sorted.
    pub topics: Vec<String>,
}

/// Snapshot the registry for `GET /health`.
pub fn health_check(start_time: Instant, registry: &SessionRegistry, draining: bool) -> HealthResponse {
    let mut topics: Vec<String> = registry.active_topics().into_iter().collect();
    topics.sort_unstable();
    HealthResponse {
        status: if draining { "draining" } else { "ok" },
        service: "tars-backend",
        uptime_secs: start_time.elapsed().as_secs(),
        connections: registry.len(),
        topics,
    }
}
