//! `TarsServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tars_core::SessionKey;
use tars_host::HostServices;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::api;
use crate::config::ServerConfig;
use crate::errors::{ApiError, ServerError};
use crate::health::{self, HealthResponse};
use crate::metrics::WS_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::handler::Dispatcher;
use crate::websocket::publisher::TopicPublisher;
use crate::websocket::registry::SessionRegistry;
use crate::websocket::session::{SessionContext, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live WebSocket sessions.
    pub registry: Arc<SessionRegistry>,
    /// WebSocket message router.
    pub dispatcher: Dispatcher,
    /// Host collaborators.
    pub host: HostServices,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`.
    pub metrics_handle: PrometheusHandle,
    /// One permit per allowed WebSocket session.
    pub connection_slots: Arc<Semaphore>,
}

impl AppState {
    fn session_context(&self) -> SessionContext {
        SessionContext {
            registry: Arc::clone(&self.registry),
            dispatcher: self.dispatcher.clone(),
            outbound_buffer: self.config.outbound_buffer,
            heartbeat_interval: self.config.heartbeat_interval(),
            heartbeat_timeout: self.config.heartbeat_timeout(),
            shutdown: self.shutdown.token(),
        }
    }
}

/// The TARS backend server.
pub struct TarsServer {
    state: AppState,
}

impl TarsServer {
    /// Create a server over `host`.
    pub fn new(config: ServerConfig, host: HostServices, metrics_handle: PrometheusHandle) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.duplicate_sessions));
        let dispatcher = Dispatcher::new(Arc::clone(&registry), host.clone());
        let connection_slots = Arc::new(Semaphore::new(config.max_connections));
        Self {
            state: AppState {
                registry,
                dispatcher,
                host,
                config: Arc::new(config),
                shutdown: Arc::new(ShutdownCoordinator::new()),
                start_time: Instant::now(),
                metrics_handle,
                connection_slots,
            },
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/api/ws", get(ws_generated_key))
            .route("/api/ws/{connection_id}", get(ws_client_key))
            .nest("/api", api::routes())
            .with_state(self.state.clone())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind and serve until the shutdown token fires.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let host = self.state.config.host.clone();
        let port = self.state.config.port;
        let listener = tokio::net::TcpListener::bind((host.as_str(), port))
            .await
            .map_err(|e| ServerError::bind(format!("{host}:{port}"), e))?;
        let addr = listener.local_addr().map_err(ServerError::LocalAddr)?;
        info!(%addr, "TARS server listening");

        let router = self.router();
        let token = self.state.shutdown.token();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        });
        Ok((addr, handle))
    }

    /// Start the topic publisher; it stops with the shutdown token.
    pub fn spawn_publisher(&self) -> JoinHandle<()> {
        let config = &self.state.config;
        let publisher = TopicPublisher::new(
            Arc::clone(&self.state.registry),
            self.state.host.clone(),
            config.publish_interval(),
            config.default_process_limit,
        );
        tokio::spawn(publisher.run(self.state.shutdown.token()))
    }

    /// Session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.state.registry
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        &state.registry,
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics_handle)
}

/// GET /api/ws
async fn ws_generated_key(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    upgrade(ws, &state, SessionKey::generate())
}

/// GET /api/ws/{connection_id}
async fn ws_client_key(
    ws: WebSocketUpgrade,
    Path(connection_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, &state, SessionKey::from(connection_id))
}

/// Reserve a connection slot, then hand the socket to a session.
///
/// The permit lives as long as the session, so concurrent upgrades can never
/// exceed `max_connections`.
fn upgrade(ws: WebSocketUpgrade, state: &AppState, key: SessionKey) -> Response {
    let Ok(slot) = Arc::clone(&state.connection_slots).try_acquire_owned() else {
        warn!(max = state.config.max_connections, "connection limit reached");
        counter!(WS_REJECTED_TOTAL, "reason" => "capacity").increment(1);
        return ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    };
    let ctx = state.session_context();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            run_ws_session(socket, key, ctx).await;
            drop(slot);
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, header};
    use serde_json::Value;
    use tars_host::stubs::{KillOutcome, StubContainers, StubProcesses, stub_services};
    use tower::ServiceExt;

    fn make_server_with(host: HostServices) -> TarsServer {
        TarsServer::new(
            ServerConfig::default(),
            host,
            crate::metrics::detached_handle(),
        )
    }

    fn make_server() -> TarsServer {
        make_server_with(stub_services(Arc::new(StubContainers::new())))
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(b) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(b.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[test]
    fn defaults_are_exposed() {
        let server = make_server();
        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.config().port, 0);
        assert!(server.registry().is_empty());
        assert!(!server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (status, body) = call(make_server().router(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "tars-backend");
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_text() {
        let app = make_server().router();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn system_info_and_metrics() {
        let server = make_server();
        let (status, body) = call(server.router(), "GET", "/api/system/info", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["hostname"], "tars-test");
        let (status, body) = call(server.router(), "GET", "/api/system/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["cpu_percent"].is_number());
    }

    #[tokio::test]
    async fn processes_list_and_kill() {
        let server = make_server();
        let (status, body) = call(server.router(), "GET", "/api/processes?limit=2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (status, body) = call(server.router(), "POST", "/api/processes/3/kill", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Process 3 terminated");
    }

    #[tokio::test]
    async fn kill_not_found_is_404() {
        let mut host = stub_services(Arc::new(StubContainers::new()));
        host.processes = Arc::new(StubProcesses::new().with_kill(KillOutcome::NotFound));
        let (status, body) =
            call(make_server_with(host).router(), "POST", "/api/processes/999999/kill", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Failed to kill process: Process not found");
    }

    #[tokio::test]
    async fn container_routes() {
        let server = make_server();
        let (status, body) = call(server.router(), "GET", "/api/containers", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["name"], "web");

        let (status, body) = call(server.router(), "GET", "/api/containers/abc/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["health"], "healthy");

        let (status, body) =
            call(server.router(), "GET", "/api/containers/abc/logs?tail=2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["logs"].is_string());

        let (status, body) = call(server.router(), "POST", "/api/containers/abc/restart", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Container restarted successfully");
    }

    #[tokio::test]
    async fn container_errors() {
        let server = make_server();
        let (status, _) = call(server.router(), "POST", "/api/containers/abc/explode", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = call(server.router(), "GET", "/api/containers/zzz/stats", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn app_routes() {
        let server = make_server();
        let (status, body) = call(server.router(), "GET", "/api/apps", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[1]["name"], "media");
        assert_eq!(body[1]["status"], "partial");
        assert_eq!(body[1]["running_containers"], 1);
        assert_eq!(body[1]["total_containers"], 2);

        let (status, body) = call(server.router(), "GET", "/api/apps/media/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["app_name"], "media");
        assert_eq!(body["status"], "partial");
        assert_eq!(body["summary"]["healthy"], 1);
        assert_eq!(body["summary"]["stopped"], 1);

        let (status, body) = call(server.router(), "POST", "/api/apps/media/restart", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Application media restarted successfully");
    }

    #[tokio::test]
    async fn app_errors() {
        let server = make_server();
        let (status, body) = call(server.router(), "POST", "/api/apps/media/explode", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid action. Use start, stop, or restart");

        let (status, body) = call(server.router(), "POST", "/api/apps/ghost/stop", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Failed to stop application: Application ghost not found");

        let (status, body) = call(server.router(), "GET", "/api/apps/ghost/health", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn power_action() {
        let server = make_server();
        let (status, body) = call(
            server.router(),
            "POST",
            "/api/power/power",
            Some(r#"{"action":"reboot"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["message"], "System rebooting");

        let (status, body) = call(
            server.router(),
            "POST",
            "/api/power/power",
            Some(r#"{"action":"hibernate"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid power action");
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let (status, _) = call(make_server().router(), "GET", "/nonexistent", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server.shutdown().shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
