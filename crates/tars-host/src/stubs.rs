//! In-memory collaborators for tests.
//!
//! [`StubContainers`] can be gated so a test decides exactly when each
//! pending container action or log fetch completes.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

use crate::HostServices;
use crate::command::{CommandOutput, CommandRunner, render};
use crate::errors::{HostError, Result};
use crate::traits::{
    AppRuntime, ContainerRuntime, MetricsSource, NetworkSource, PowerControl, ProcessControl,
};
use crate::types::{
    AppContainer, AppHealth, AppSummary, ContainerAction, ContainerHealth, ContainerInfo, ContainerStats, NetworkStats, PowerAction,
    ProcessInfo, SystemInfo, SystemMetrics, Usage,
};

// ── Command runner ──

enum Scripted {
    Output(CommandOutput),
    Unavailable,
    Timeout,
}

/// A [`CommandRunner`] answering from a script keyed by command-line prefix.
///
/// Unmatched commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<(String, Scripted)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    /// Empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `prefix…` with full output.
    #[must_use]
    pub fn output(mut self, prefix: &str, stdout: &str, stderr: &str, exit_code: i32) -> Self {
        self.rules.push((
            prefix.to_string(),
            Scripted::Output(CommandOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                exit_code,
            }),
        ));
        self
    }

    /// Answer `prefix…` with exit 0 and `stdout`.
    #[must_use]
    pub fn ok(self, prefix: &str, stdout: &str) -> Self {
        self.output(prefix, stdout, "", 0)
    }

    /// Answer `prefix…` with a failing exit code.
    #[must_use]
    pub fn exit(self, prefix: &str, exit_code: i32, stderr: &str) -> Self {
        self.output(prefix, "", stderr, exit_code)
    }

    /// Pretend the program for `prefix…` is not installed.
    #[must_use]
    pub fn unavailable(mut self, prefix: &str) -> Self {
        self.rules.push((prefix.to_string(), Scripted::Unavailable));
        self
    }

    /// Pretend `prefix…` timed out.
    #[must_use]
    pub fn timeout(mut self, prefix: &str) -> Self {
        self.rules.push((prefix.to_string(), Scripted::Timeout));
        self
    }

    /// Command lines run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let line = render(program, args);
        self.calls.lock().push(line.clone());
        match self.rules.iter().find(|(prefix, _)| line.starts_with(prefix.as_str())) {
            Some((_, Scripted::Output(out))) => Ok(out.clone()),
            Some((_, Scripted::Unavailable)) => Err(HostError::Unavailable(program.to_string())),
            Some((_, Scripted::Timeout)) => Err(HostError::Timeout {
                command: line,
                secs: timeout.as_secs(),
            }),
            None => Ok(CommandOutput::default()),
        }
    }
}

// ── Metrics ──

/// Fixed metrics, or a failure on every call.
pub struct StaticMetrics {
    fail: bool,
}

impl StaticMetrics {
    /// Always succeeds.
    pub fn new() -> Self {
        Self { fail: false }
    }

    /// Always fails with an I/O error.
    pub fn failing() -> Self {
        Self { fail: true }
    }

    /// The info returned on success.
    pub fn info() -> SystemInfo {
        SystemInfo {
            hostname: "tars-test".into(),
            os: "Linux 6.1.0".into(),
            uptime_seconds: 3600,
            cpu_count: 4,
            total_memory_bytes: 8 * 1024 * 1024 * 1024,
            kernel: "6.1.0".into(),
        }
    }

    fn check(&self) -> Result<()> {
        if self.fail {
            Err(HostError::Io(std::io::Error::other("sensor read failed")))
        } else {
            Ok(())
        }
    }
}

impl Default for StaticMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsSource for StaticMetrics {
    async fn system_info(&self) -> Result<SystemInfo> {
        self.check()?;
        Ok(Self::info())
    }

    async fn metrics(&self) -> Result<SystemMetrics> {
        self.check()?;
        Ok(SystemMetrics {
            cpu_percent: 12.5,
            memory: Usage {
                total: 8 * 1024 * 1024 * 1024,
                used: 2 * 1024 * 1024 * 1024,
            },
            disk: Usage {
                total: 100 * 1024 * 1024 * 1024,
                used: 40 * 1024 * 1024 * 1024,
            },
        })
    }
}

// ── Processes ──

/// How [`StubProcesses::kill_process`] answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KillOutcome {
    /// The process was killed.
    Killed,
    /// No such process.
    NotFound,
    /// Signal refused.
    PermissionDenied,
}

/// Fixed process table.
pub struct StubProcesses {
    processes: Vec<ProcessInfo>,
    kill: KillOutcome,
}

impl StubProcesses {
    /// Three processes; kills succeed.
    pub fn new() -> Self {
        let processes = (1..=3)
            .map(|pid| ProcessInfo {
                pid,
                user: "root".into(),
                cmd: format!("/usr/bin/worker --id {pid}"),
                cpu_percent: 10.0 * f32::from(u8::try_from(pid).unwrap_or(0)),
                mem_bytes: u64::from(pid) * 1024 * 1024,
            })
            .collect();
        Self {
            processes,
            kill: KillOutcome::Killed,
        }
    }

    /// Change how kills answer.
    #[must_use]
    pub fn with_kill(mut self, kill: KillOutcome) -> Self {
        self.kill = kill;
        self
    }
}

impl Default for StubProcesses {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessControl for StubProcesses {
    async fn list_processes(&self, limit: usize) -> Vec<ProcessInfo> {
        self.processes.iter().take(limit).cloned().collect()
    }

    async fn kill_process(&self, _pid: u32) -> Result<bool> {
        match self.kill {
            KillOutcome::Killed => Ok(true),
            KillOutcome::NotFound => Err(HostError::NotFound("Process not found".into())),
            KillOutcome::PermissionDenied => Err(HostError::PermissionDenied(
                "Permission denied to kill process".into(),
            )),
        }
    }
}

// ── Containers ──

/// Container runtime whose slow operations can be held open by a test.
pub struct StubContainers {
    containers: Vec<ContainerInfo>,
    gate: Option<Semaphore>,
    fail_actions: Option<String>,
    logs: String,
    started: AtomicUsize,
    started_notify: Notify,
    finished: AtomicUsize,
}

impl StubContainers {
    /// Ungated runtime with two containers.
    pub fn new() -> Self {
        Self {
            containers: vec![
                ContainerInfo {
                    id: "abc".into(),
                    name: "web".into(),
                    image: "nginx:latest".into(),
                    status: ContainerHealth::Healthy,
                    ports: "0.0.0.0:80->80/tcp".into(),
                    full_status: "Up 2 hours (healthy)".into(),
                },
                ContainerInfo {
                    id: "def".into(),
                    name: "db".into(),
                    image: "postgres:16".into(),
                    status: ContainerHealth::Stopped,
                    ports: String::new(),
                    full_status: "Exited (0) 1 hour ago".into(),
                },
            ],
            gate: None,
            fail_actions: None,
            logs: (1..=10).map(|i| format!("line {i}\n")).collect(),
            started: AtomicUsize::new(0),
            started_notify: Notify::new(),
            finished: AtomicUsize::new(0),
        }
    }

    /// Hold every action and log fetch until [`release`](Self::release).
    #[must_use]
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    /// Make every action fail with `message`.
    #[must_use]
    pub fn failing_actions(mut self, message: &str) -> Self {
        self.fail_actions = Some(message.to_string());
        self
    }

    /// Replace the log text.
    #[must_use]
    pub fn with_logs(mut self, logs: &str) -> Self {
        self.logs = logs.to_string();
        self
    }

    /// Let `n` pending (or future) gated calls complete.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Wait until at least `n` gated calls have started.
    pub async fn wait_started(&self, n: usize) {
        loop {
            let notified = self.started_notify.notified();
            if self.started.load(Ordering::SeqCst) >= n {
                return;
            }
            notified.await;
        }
    }

    /// Calls that ran to completion (not cancelled while gated).
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    async fn pass_gate(&self) {
        let _ = self.started.fetch_add(1, Ordering::SeqCst);
        self.started_notify.notify_waiters();
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        let _ = self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for StubContainers {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for StubContainers {
    async fn list_containers(&self) -> Vec<ContainerInfo> {
        self.containers.clone()
    }

    async fn run_action(&self, container_id: &str, action: ContainerAction) -> Result<String> {
        self.pass_gate().await;
        if let Some(message) = &self.fail_actions {
            return Err(HostError::CommandFailed {
                command: format!("docker {action} {container_id}"),
                stderr: message.clone(),
            });
        }
        if !self.containers.iter().any(|c| c.id == container_id) {
            return Err(HostError::NotFound(format!("No such container: {container_id}")));
        }
        Ok(format!("Container {} successfully", action.past_tense()))
    }

    async fn logs(&self, container_id: &str, _tail: usize) -> Result<String> {
        self.pass_gate().await;
        if self.containers.iter().any(|c| c.id == container_id) {
            Ok(self.logs.clone())
        } else {
            Err(HostError::NotFound(format!("No such container: {container_id}")))
        }
    }

    async fn stats(&self, container_id: &str) -> Result<ContainerStats> {
        if !self.containers.iter().any(|c| c.id == container_id) {
            return Err(HostError::NotFound(format!("No such container: {container_id}")));
        }
        Ok(ContainerStats {
            cpu_percent: 1.5,
            memory_bytes: 64 * 1024 * 1024,
            memory_limit_bytes: 1024 * 1024 * 1024,
            memory_percent: 6.25,
            health: Some("healthy".into()),
            env_vars: vec!["PATH".into()],
        })
    }
}

// ── Apps ──

/// Two fixed apps: `media` (one of two containers up) and `backup` (down).
pub struct StubApps {
    apps: Vec<(String, Vec<AppContainer>)>,
    actions: Mutex<Vec<(String, ContainerAction)>>,
}

impl StubApps {
    /// The default pair of apps.
    pub fn new() -> Self {
        let container = |name: &str, state: &str, health: &str| AppContainer {
            name: name.into(),
            status: state.into(),
            ports: String::new(),
            health: health.into(),
            uptime: String::new(),
        };
        Self {
            apps: vec![
                (
                    "backup".into(),
                    vec![container("backup-restic-1", "exited", "")],
                ),
                (
                    "media".into(),
                    vec![
                        container("media-web-1", "running", "healthy"),
                        container("media-db-1", "exited", ""),
                    ],
                ),
            ],
            actions: Mutex::new(Vec::new()),
        }
    }

    /// Actions requested so far.
    pub fn actions(&self) -> Vec<(String, ContainerAction)> {
        self.actions.lock().clone()
    }

    fn containers(&self, app_name: &str) -> Result<Vec<AppContainer>> {
        self.apps
            .iter()
            .find(|(name, _)| name == app_name)
            .map(|(_, containers)| containers.clone())
            .ok_or_else(|| HostError::NotFound(format!("Application {app_name} not found")))
    }
}

impl Default for StubApps {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AppRuntime for StubApps {
    async fn list_apps(&self) -> Result<Vec<AppSummary>> {
        Ok(self
            .apps
            .iter()
            .map(|(name, containers)| AppSummary::from_containers(name.clone(), containers.clone()))
            .collect())
    }

    async fn run_app_action(&self, app_name: &str, action: ContainerAction) -> Result<String> {
        let _ = self.containers(app_name)?;
        self.actions.lock().push((app_name.to_string(), action));
        Ok(format!("Application {app_name} {} successfully", action.past_tense()))
    }

    async fn app_health(&self, app_name: &str) -> Result<AppHealth> {
        Ok(AppHealth::from_containers(app_name, self.containers(app_name)?))
    }
}

// ── Power ──

/// Records power actions instead of executing them.
#[derive(Default)]
pub struct StubPower {
    executed: Mutex<Vec<PowerAction>>,
}

impl StubPower {
    /// Actions requested so far.
    pub fn executed(&self) -> Vec<PowerAction> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl PowerControl for StubPower {
    async fn execute(&self, action: PowerAction) -> Result<String> {
        self.executed.lock().push(action);
        Ok(match action {
            PowerAction::Reboot => "System rebooting".into(),
            PowerAction::Shutdown => "System shutting down".into(),
        })
    }
}

// ── Network ──

/// Fixed network counters, or a failure on every call.
#[derive(Default)]
pub struct StubNetwork {
    fail: bool,
}

impl StubNetwork {
    /// Always fails.
    pub fn failing() -> Self {
        Self { fail: true }
    }
}

#[async_trait]
impl NetworkSource for StubNetwork {
    async fn network_stats(&self) -> Result<NetworkStats> {
        if self.fail {
            return Err(HostError::Unavailable("/proc".into()));
        }
        let mut stats = NetworkStats {
            total_bytes_sent: 1000,
            total_bytes_recv: 2000,
            ..NetworkStats::default()
        };
        let _ = stats.process_network.insert(
            1,
            crate::types::ProcessNetwork {
                connections: 2,
                bytes_sent: 0,
                bytes_recv: 0,
            },
        );
        Ok(stats)
    }
}

/// Build a [`HostServices`] from stubs, keeping the container stub reachable.
pub fn stub_services(containers: Arc<StubContainers>) -> HostServices {
    HostServices {
        metrics: Arc::new(StaticMetrics::new()),
        processes: Arc::new(StubProcesses::new()),
        containers,
        apps: Arc::new(StubApps::new()),
        power: Arc::new(StubPower::default()),
        network: Arc::new(StubNetwork::default()),
    }
}
