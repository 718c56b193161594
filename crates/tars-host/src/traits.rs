//! Collaborator traits consumed by the server.
//!
//! Every trait is object-safe (`Arc<dyn …>`) so the server can be wired
//! with real implementations in production and stubs in tests.

use async_trait::async_trait;

use crate::errors::Result;
use crate::types::{
    AppHealth, AppSummary, ContainerAction, ContainerInfo, ContainerStats, NetworkStats,
    PowerAction, ProcessInfo, SystemInfo, SystemMetrics,
};

/// Reads host facts and utilisation.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Static host information.
    async fn system_info(&self) -> Result<SystemInfo>;

    /// Current CPU, memory and disk utilisation.
    async fn metrics(&self) -> Result<SystemMetrics>;
}

/// Lists and terminates processes.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Busiest processes, at most `limit`. Returns an empty list on internal error.
    async fn list_processes(&self, limit: usize) -> Vec<ProcessInfo>;

    /// Terminate `pid`, escalating to a hard kill after a grace period.
    async fn kill_process(&self, pid: u32) -> Result<bool>;
}

/// Container runtime operations.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// All containers. Returns an empty list when the runtime is unavailable.
    async fn list_containers(&self) -> Vec<ContainerInfo>;

    /// Run a lifecycle action, returning a human-readable result.
    async fn run_action(&self, container_id: &str, action: ContainerAction) -> Result<String>;

    /// The last `tail` lines of the container's log.
    async fn logs(&self, container_id: &str, tail: usize) -> Result<String>;

    /// Current resource usage of one container.
    async fn stats(&self, container_id: &str) -> Result<ContainerStats>;
}

/// Compose-managed TARS apps, one directory each.
#[async_trait]
pub trait AppRuntime: Send + Sync {
    /// Every app with its container counts, sorted by name.
    async fn list_apps(&self) -> Result<Vec<AppSummary>>;

    /// Start, stop or restart every container of one app.
    async fn run_app_action(&self, app_name: &str, action: ContainerAction) -> Result<String>;

    /// Per-container health of one app.
    async fn app_health(&self, app_name: &str) -> Result<AppHealth>;
}

/// Reboots or halts the host.
#[async_trait]
pub trait PowerControl: Send + Sync {
    /// Execute the action, returning a human-readable result.
    async fn execute(&self, action: PowerAction) -> Result<String>;
}

/// Network counters.
#[async_trait]
pub trait NetworkSource: Send + Sync {
    /// Host totals and per-process socket usage.
    async fn network_stats(&self) -> Result<NetworkStats>;
}
