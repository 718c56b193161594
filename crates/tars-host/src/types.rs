//! Data returned by host collaborators.
//!
//! These shapes are what clients see inside the `data` field of push
//! messages and in REST responses.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::HostError;

/// Static facts about the host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Host name.
    pub hostname: String,
    /// `"<os> <release>"`.
    pub os: String,
    /// Seconds since boot.
    pub uptime_seconds: u64,
    /// Logical CPU count.
    pub cpu_count: usize,
    /// Physical memory in bytes.
    pub total_memory_bytes: u64,
    /// Kernel release.
    pub kernel: String,
}

/// Total / used pair in bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Capacity in bytes.
    pub total: u64,
    /// Bytes in use.
    pub used: u64,
}

/// Point-in-time utilisation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    /// Global CPU utilisation, 0–100.
    pub cpu_percent: f32,
    /// Memory usage; `used` is `total - available`.
    pub memory: Usage,
    /// Root filesystem usage.
    pub disk: Usage,
}

/// One row of the process table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// Process id.
    pub pid: u32,
    /// Owning user name, or `"unknown"`.
    pub user: String,
    /// Command line, truncated.
    pub cmd: String,
    /// CPU utilisation since the previous sample.
    pub cpu_percent: f32,
    /// Resident memory in bytes.
    pub mem_bytes: u64,
}

/// Coarse container state derived from `docker ps` status text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerHealth {
    /// Up with a passing health check.
    Healthy,
    /// Up with a failing health check.
    Unhealthy,
    /// Up, no health check.
    Running,
    /// Exited.
    Stopped,
    /// Created but never started.
    Created,
    /// Anything else (restarting, paused, dead…).
    Unknown,
}

impl ContainerHealth {
    /// Classify a `docker ps` status string such as `Up 3 hours (healthy)`.
    pub fn from_status(status: &str) -> Self {
        if status.contains("Up") {
            if status.contains("(healthy)") {
                Self::Healthy
            } else if status.contains("(unhealthy)") {
                Self::Unhealthy
            } else {
                Self::Running
            }
        } else if status.contains("Exited") {
            Self::Stopped
        } else if status.contains("Created") {
            Self::Created
        } else {
            Self::Unknown
        }
    }
}

/// One container as listed by the runtime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Short container id.
    pub id: String,
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Classified status.
    pub status: ContainerHealth,
    /// Published ports, as printed by the runtime.
    pub ports: String,
    /// Raw status text.
    pub full_status: String,
}

/// Resource usage of a single container.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    /// CPU utilisation, 0–100 per core.
    pub cpu_percent: f64,
    /// Memory in use, bytes.
    pub memory_bytes: u64,
    /// Memory limit, bytes.
    pub memory_limit_bytes: u64,
    /// Memory usage relative to the limit.
    pub memory_percent: f64,
    /// Health-check status, when the container defines one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<String>,
    /// Names (not values) of the first few environment variables.
    pub env_vars: Vec<String>,
}

/// Per-process network usage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessNetwork {
    /// Open sockets.
    pub connections: usize,
    /// Bytes sent, when the platform reports it.
    pub bytes_sent: u64,
    /// Bytes received, when the platform reports it.
    pub bytes_recv: u64,
}

/// Host-wide and per-process network counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    /// Bytes sent on all interfaces since boot.
    pub total_bytes_sent: u64,
    /// Bytes received on all interfaces since boot.
    pub total_bytes_recv: u64,
    /// Usage keyed by pid.
    pub process_network: BTreeMap<u32, ProcessNetwork>,
}

/// Lifecycle action on a container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerAction {
    /// `docker start`.
    Start,
    /// `docker stop`.
    Stop,
    /// `docker restart`.
    Restart,
}

impl ContainerAction {
    /// Lowercase verb, as passed to the runtime.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }

    /// Past tense, for success messages.
    pub fn past_tense(self) -> &'static str {
        match self {
            Self::Start => "started",
            Self::Stop => "stopped",
            Self::Restart => "restarted",
        }
    }

    /// Capitalised verb, for progress messages.
    pub fn title(self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::Stop => "Stop",
            Self::Restart => "Restart",
        }
    }
}

impl fmt::Display for ContainerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerAction {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            other => Err(HostError::InvalidAction(other.to_string())),
        }
    }
}

// ── Apps ──

/// One container of a compose-managed app.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppContainer {
    /// Container name.
    pub name: String,
    /// Compose state, e.g. `running` or `exited`.
    pub status: String,
    /// Published ports, as compose prints them.
    pub ports: String,
    /// Health-check status, empty without a health check.
    pub health: String,
    /// How long the container has been in its current state.
    pub uptime: String,
}

impl AppContainer {
    /// Whether compose reports the container as up.
    pub fn is_running(&self) -> bool {
        self.status == "running" || self.status.starts_with("Up")
    }
}

/// Overall state of an app in the listing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    /// Every container is up.
    Running,
    /// No container is up.
    Stopped,
    /// Some containers are up.
    Partial,
    /// Compose could not be queried.
    Unknown,
}

/// One entry of `GET /api/apps`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppSummary {
    /// Directory name under the apps root.
    pub name: String,
    /// Overall state.
    pub status: AppStatus,
    /// Containers compose knows about.
    pub containers: Vec<AppContainer>,
    /// How many of them are up.
    pub running_containers: usize,
    /// `containers.len()`.
    pub total_containers: usize,
}

impl AppSummary {
    /// Summarise an app from its containers.
    pub fn from_containers(name: impl Into<String>, containers: Vec<AppContainer>) -> Self {
        let running = containers.iter().filter(|c| c.is_running()).count();
        let status = match running {
            0 => AppStatus::Stopped,
            n if n == containers.len() => AppStatus::Running,
            _ => AppStatus::Partial,
        };
        Self {
            name: name.into(),
            status,
            running_containers: running,
            total_containers: containers.len(),
            containers,
        }
    }

    /// An app whose state could not be read.
    pub fn unknown(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: AppStatus::Unknown,
            containers: Vec::new(),
            running_containers: 0,
            total_containers: 0,
        }
    }
}

/// Health verdict for one app.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppHealthStatus {
    /// Every container is up and none reports unhealthy.
    Healthy,
    /// At least one running container reports unhealthy.
    Unhealthy,
    /// Some containers are down.
    Partial,
    /// No container is up.
    Stopped,
    /// Compose listed no containers.
    Unknown,
}

/// Container counts behind an [`AppHealth`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppHealthSummary {
    /// All containers.
    pub total: usize,
    /// Up.
    pub running: usize,
    /// Not up.
    pub stopped: usize,
    /// Up and passing their health check.
    pub healthy: usize,
    /// Up and failing their health check.
    pub unhealthy: usize,
}

/// Body of `GET /api/apps/{name}/health`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppHealth {
    /// App name.
    pub app_name: String,
    /// Overall verdict.
    pub status: AppHealthStatus,
    /// Per-container detail.
    pub containers: Vec<AppContainer>,
    /// Counts.
    pub summary: AppHealthSummary,
}

impl AppHealth {
    /// Grade an app from its containers.
    pub fn from_containers(app_name: impl Into<String>, containers: Vec<AppContainer>) -> Self {
        let mut summary = AppHealthSummary {
            total: containers.len(),
            ..AppHealthSummary::default()
        };
        for c in &containers {
            if !c.is_running() {
                summary.stopped += 1;
                continue;
            }
            summary.running += 1;
            match c.health.as_str() {
                "healthy" => summary.healthy += 1,
                "unhealthy" => summary.unhealthy += 1,
                _ => {}
            }
        }
        let status = if summary.total == 0 {
            AppHealthStatus::Unknown
        } else if summary.running == 0 {
            AppHealthStatus::Stopped
        } else if summary.unhealthy > 0 {
            AppHealthStatus::Unhealthy
        } else if summary.running == summary.total {
            AppHealthStatus::Healthy
        } else {
            AppHealthStatus::Partial
        };
        Self {
            app_name: app_name.into(),
            status,
            containers,
            summary,
        }
    }
}

/// Host power action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    /// Restart the machine.
    Reboot,
    /// Halt the machine.
    Shutdown,
}

impl PowerAction {
    /// Flag passed to `shutdown(8)`.
    pub fn shutdown_flag(self) -> &'static str {
        match self {
            Self::Reboot => "-r",
            Self::Shutdown => "-h",
        }
    }
}

impl FromStr for PowerAction {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reboot" => Ok(Self::Reboot),
            "shutdown" => Ok(Self::Shutdown),
            other => Err(HostError::InvalidAction(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_container_status() {
        assert_eq!(ContainerHealth::from_status("Up 2 hours (healthy)"), ContainerHealth::Healthy);
        assert_eq!(ContainerHealth::from_status("Up 5 seconds (unhealthy)"), ContainerHealth::Unhealthy);
        assert_eq!(ContainerHealth::from_status("Up 3 days"), ContainerHealth::Running);
        assert_eq!(ContainerHealth::from_status("Exited (0) 4 minutes ago"), ContainerHealth::Stopped);
        assert_eq!(ContainerHealth::from_status("Created"), ContainerHealth::Created);
        assert_eq!(ContainerHealth::from_status("Restarting (1) 2 seconds ago"), ContainerHealth::Unknown);
    }

    #[test]
    fn health_serializes_lowercase() {
        let json = serde_json::to_string(&ContainerHealth::Stopped).unwrap();
        assert_eq!(json, "\"stopped\"");
    }

    #[test]
    fn container_action_wording() {
        assert_eq!(ContainerAction::Restart.title(), "Restart");
        assert_eq!(ContainerAction::Stop.past_tense(), "stopped");
        assert_eq!(ContainerAction::Start.to_string(), "start");
    }

    #[test]
    fn container_action_parse() {
        assert_eq!("stop".parse::<ContainerAction>().unwrap(), ContainerAction::Stop);
        assert!(matches!(
            "pause".parse::<ContainerAction>(),
            Err(HostError::InvalidAction(a)) if a == "pause"
        ));
    }

    #[test]
    fn container_action_rejects_unknown_in_json() {
        let err = serde_json::from_str::<ContainerAction>("\"delete\"");
        assert!(err.is_err());
    }

    #[test]
    fn power_action_parse_and_flag() {
        assert_eq!("reboot".parse::<PowerAction>().unwrap().shutdown_flag(), "-r");
        assert_eq!("shutdown".parse::<PowerAction>().unwrap().shutdown_flag(), "-h");
        assert!("hibernate".parse::<PowerAction>().is_err());
    }

    #[test]
    fn network_stats_keys_are_pids() {
        let mut stats = NetworkStats::default();
        let _ = stats.process_network.insert(
            42,
            ProcessNetwork {
                connections: 3,
                ..ProcessNetwork::default()
            },
        );
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["process_network"]["42"]["connections"], 3);
        assert_eq!(json["total_bytes_sent"], 0);
    }

    #[test]
    fn metrics_shape() {
        let metrics = SystemMetrics {
            cpu_percent: 12.5,
            memory: Usage { total: 100, used: 40 },
            disk: Usage { total: 1000, used: 10 },
        };
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["memory"]["used"], 40);
        assert_eq!(json["disk"]["total"], 1000);
    }

    fn app_container(state: &str, health: &str) -> AppContainer {
        AppContainer {
            name: "c".into(),
            status: state.into(),
            health: health.into(),
            ..AppContainer::default()
        }
    }

    #[test]
    fn app_summary_counts_running_containers() {
        let app = AppSummary::from_containers(
            "media",
            vec![app_container("running", ""), app_container("exited", ""), app_container("Up 3 minutes", "")],
        );
        assert_eq!(app.status, AppStatus::Partial);
        assert_eq!(app.running_containers, 2);
        assert_eq!(app.total_containers, 3);
        assert_eq!(AppSummary::from_containers("x", vec![]).status, AppStatus::Stopped);
        assert_eq!(
            AppSummary::from_containers("x", vec![app_container("running", "")]).status,
            AppStatus::Running
        );
        let json = serde_json::to_value(AppSummary::unknown("x")).unwrap();
        assert_eq!(json["status"], "unknown");
        assert_eq!(json["running_containers"], 0);
    }

    #[test]
    fn app_health_verdicts() {
        let grade = |containers: Vec<AppContainer>| AppHealth::from_containers("a", containers).status;
        assert_eq!(grade(vec![]), AppHealthStatus::Unknown);
        assert_eq!(grade(vec![app_container("exited", "")]), AppHealthStatus::Stopped);
        assert_eq!(
            grade(vec![app_container("running", "healthy"), app_container("running", "")]),
            AppHealthStatus::Healthy
        );
        assert_eq!(
            grade(vec![app_container("running", "unhealthy"), app_container("exited", "")]),
            AppHealthStatus::Unhealthy
        );
        assert_eq!(
            grade(vec![app_container("running", "healthy"), app_container("exited", "")]),
            AppHealthStatus::Partial
        );

        let health = AppHealth::from_containers(
            "a",
            vec![app_container("running", "healthy"), app_container("running", "unhealthy"), app_container("created", "")],
        );
        assert_eq!(
            health.summary,
            AppHealthSummary {
                total: 3,
                running: 2,
                stopped: 1,
                healthy: 1,
                unhealthy: 1,
            }
        );
    }
}
