//! Container runtime backed by the `docker` CLI.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tars_settings::HostSettings;
use tracing::{debug, warn};

use crate::command::{CommandOutput, CommandRunner, render};
use crate::errors::{HostError, Result};
use crate::traits::ContainerRuntime;
use crate::types::{ContainerAction, ContainerHealth, ContainerInfo, ContainerStats};

const PS_FORMAT: &str = "{{.ID}}\t{{.Names}}\t{{.Image}}\t{{.Status}}\t{{.Ports}}";
const STATS_FORMAT: &str = "{{.CPUPerc}}\t{{.MemUsage}}\t{{.MemPerc}}";

/// Number of environment variable names reported by [`ContainerRuntime::stats`].
const ENV_NAMES_SHOWN: usize = 5;

/// Docker CLI wrapper.
///
/// Client-supplied container ids always follow a `--` so docker never reads
/// one as a flag.
pub struct DockerCli {
    runner: Arc<dyn CommandRunner>,
    bin: String,
    command_timeout: Duration,
    action_timeout: Duration,
    logs_timeout: Duration,
}

impl DockerCli {
    /// Build from host settings.
    pub fn new(runner: Arc<dyn CommandRunner>, settings: &HostSettings) -> Self {
        Self {
            runner,
            bin: settings.docker_bin.clone(),
            command_timeout: Duration::from_secs(settings.command_timeout_secs),
            action_timeout: Duration::from_secs(settings.action_timeout_secs),
            logs_timeout: Duration::from_secs(settings.logs_timeout_secs),
        }
    }

    /// Run docker and fail on a non-zero exit.
    async fn docker(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let out = self.runner.run(&self.bin, args, timeout).await?;
        if out.success() {
            return Ok(out);
        }
        let stderr = out.diagnostic();
        if stderr.contains("No such container") {
            return Err(HostError::NotFound(stderr));
        }
        Err(HostError::CommandFailed {
            command: render(&self.bin, args),
            stderr,
        })
    }

    async fn try_list(&self) -> Result<Vec<ContainerInfo>> {
        let _ = self.docker(&["--version"], self.command_timeout).await?;
        let out = self
            .docker(&["ps", "-a", "--format", PS_FORMAT], self.command_timeout)
            .await?;
        Ok(out.stdout.lines().filter_map(parse_ps_line).collect())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn list_containers(&self) -> Vec<ContainerInfo> {
        match self.try_list().await {
            Ok(containers) => {
                debug!(count = containers.len(), "listed containers");
                containers
            }
            Err(e) => {
                warn!(error = %e, "container listing unavailable");
                Vec::new()
            }
        }
    }

    async fn run_action(&self, container_id: &str, action: ContainerAction) -> Result<String> {
        let _ = self
            .docker(&[action.as_str(), "--", container_id], self.action_timeout)
            .await?;
        Ok(format!("Container {} successfully", action.past_tense()))
    }

    async fn logs(&self, container_id: &str, tail: usize) -> Result<String> {
        let tail = tail.to_string();
        let out = self
            .docker(&["logs", "--tail", &tail, "--", container_id], self.logs_timeout)
            .await?;
        // docker replays the container's stderr on its own stderr
        Ok(merge_streams(&out))
    }

    async fn stats(&self, container_id: &str) -> Result<ContainerStats> {
        let out = self
            .docker(
                &["stats", "--no-stream", "--format", STATS_FORMAT, "--", container_id],
                self.command_timeout,
            )
            .await?;
        let line = out.stdout.lines().find(|l| !l.trim().is_empty()).ok_or_else(|| {
            HostError::Parse {
                what: "docker stats",
                detail: "no stats available for container".into(),
            }
        })?;
        let mut stats = parse_stats_line(line)?;

        match self.docker(&["inspect", "--", container_id], self.command_timeout).await {
            Ok(inspect) => {
                let (health, env_vars) = parse_inspect(&inspect.stdout);
                stats.health = health;
                stats.env_vars = env_vars;
            }
            Err(e) => debug!(container_id, error = %e, "inspect failed, stats without health"),
        }
        Ok(stats)
    }
}

fn merge_streams(out: &CommandOutput) -> String {
    match (out.stdout.is_empty(), out.stderr.is_empty()) {
        (_, true) => out.stdout.clone(),
        (true, false) => out.stderr.clone(),
        (false, false) => {
            let mut merged = out.stdout.clone();
            if !merged.ends_with('\n') {
                merged.push('\n');
            }
            merged.push_str(&out.stderr);
            merged
        }
    }
}

/// Parse one tab-separated `docker ps` row.
pub fn parse_ps_line(line: &str) -> Option<ContainerInfo> {
    let mut parts = line.split('\t');
    let id = parts.next()?.trim();
    let name = parts.next()?.trim();
    let image = parts.next()?.trim();
    let status = parts.next()?.trim();
    let ports = parts.next().unwrap_or("").trim();
    if id.is_empty() {
        return None;
    }
    Some(ContainerInfo {
        id: id.to_string(),
        name: name.to_string(),
        image: image.to_string(),
        status: ContainerHealth::from_status(status),
        ports: ports.to_string(),
        full_status: status.to_string(),
    })
}

/// Parse a docker size such as `12.5MiB`, `1.2GB` or `512B` into bytes.
pub fn parse_size(text: &str) -> Option<u64> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number.parse().ok()?;
    let multiplier: f64 = match unit.trim() {
        "" | "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "kB" | "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        _ => return None,
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some((value * multiplier).round() as u64)
}

fn parse_percent(text: &str) -> Option<f64> {
    text.trim().trim_end_matches('%').parse().ok()
}

/// Parse a `CPUPerc\tMemUsage\tMemPerc` row.
pub fn parse_stats_line(line: &str) -> Result<ContainerStats> {
    let bad = |detail: &str| HostError::Parse {
        what: "docker stats",
        detail: format!("{detail}: {line:?}"),
    };
    let parts: Vec<&str> = line.split('\t').collect();
    if parts.len() < 2 {
        return Err(bad("expected at least two columns"));
    }
    let cpu_percent = parse_percent(parts[0]).ok_or_else(|| bad("bad CPU percentage"))?;
    let (used, limit) = parts[1].split_once('/').unwrap_or((parts[1], ""));
    let memory_bytes = parse_size(used).ok_or_else(|| bad("bad memory usage"))?;
    let memory_limit_bytes = parse_size(limit).unwrap_or(0);
    #[allow(clippy::cast_precision_loss)]
    let memory_percent = parts
        .get(2)
        .and_then(|p| parse_percent(p))
        .unwrap_or_else(|| {
            if memory_limit_bytes == 0 {
                0.0
            } else {
                memory_bytes as f64 / memory_limit_bytes as f64 * 100.0
            }
        });
    Ok(ContainerStats {
        cpu_percent,
        memory_bytes,
        memory_limit_bytes,
        memory_percent,
        health: None,
        env_vars: Vec::new(),
    })
}

/// Extract health status and env var names from `docker inspect` JSON.
pub fn parse_inspect(json: &str) -> (Option<String>, Vec<String>) {
    let Ok(value) = serde_json::from_str::<Value>(json) else {
        return (None, Vec::new());
    };
    let first = value.get(0).unwrap_or(&value);
    let health = first
        .pointer("/State/Health/Status")
        .and_then(Value::as_str)
        .map(str::to_string);
    let env_vars = first
        .pointer("/Config/Env")
        .and_then(Value::as_array)
        .map(|vars| {
            vars.iter()
                .filter_map(Value::as_str)
                .map(|kv| kv.split_once('=').map_or(kv, |(k, _)| k).to_string())
                .take(ENV_NAMES_SHOWN)
                .collect()
        })
        .unwrap_or_default();
    (health, env_vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stubs::ScriptedRunner;
    use assert_matches::assert_matches;

    fn docker_with(runner: &Arc<ScriptedRunner>) -> DockerCli {
        DockerCli::new(runner.clone(), &HostSettings::default())
    }

    // ── parsers ──

    #[test]
    fn ps_line_parsed() {
        let c = parse_ps_line("a1b2c3\tweb\tnginx:latest\tUp 2 hours (healthy)\t0.0.0.0:80->80/tcp")
            .unwrap();
        assert_eq!(c.id, "a1b2c3");
        assert_eq!(c.name, "web");
        assert_eq!(c.image, "nginx:latest");
        assert_eq!(c.status, ContainerHealth::Healthy);
        assert_eq!(c.ports, "0.0.0.0:80->80/tcp");
        assert_eq!(c.full_status, "Up 2 hours (healthy)");
    }

    #[test]
    fn ps_line_without_ports() {
        let c = parse_ps_line("ff00\tjob\talpine\tExited (0) 3 days ago").unwrap();
        assert_eq!(c.status, ContainerHealth::Stopped);
        assert!(c.ports.is_empty());
    }

    #[test]
    fn ps_line_garbage_skipped() {
        assert!(parse_ps_line("").is_none());
        assert!(parse_ps_line("only-an-id").is_none());
    }

    #[test]
    fn sizes_parsed() {
        assert_eq!(parse_size("512B"), Some(512));
        assert_eq!(parse_size("2KiB"), Some(2048));
        assert_eq!(parse_size("1.5MiB"), Some(1_572_864));
        assert_eq!(parse_size(" 1GiB "), Some(1_073_741_824));
        assert_eq!(parse_size("3MB"), Some(3_000_000));
        assert_eq!(parse_size("lots"), None);
        assert_eq!(parse_size("4XB"), None);
    }

    #[test]
    fn stats_line_parsed() {
        let stats = parse_stats_line("0.50%\t12MiB / 1GiB\t1.17%").unwrap();
        assert!((stats.cpu_percent - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.memory_bytes, 12 * 1024 * 1024);
        assert_eq!(stats.memory_limit_bytes, 1024 * 1024 * 1024);
        assert!((stats.memory_percent - 1.17).abs() < 1e-9);
    }

    #[test]
    fn stats_percent_computed_without_column() {
        let stats = parse_stats_line("1%\t256MiB / 1GiB").unwrap();
        assert!((stats.memory_percent - 25.0).abs() < 1e-9);
    }

    #[test]
    fn stats_line_rejects_garbage() {
        assert_matches!(parse_stats_line("nope"), Err(HostError::Parse { .. }));
        assert_matches!(parse_stats_line("x%\t1MiB / 2MiB"), Err(HostError::Parse { .. }));
    }

    #[test]
    fn inspect_extracts_health_and_env() {
        let json = r#"[{"State":{"Health":{"Status":"healthy"}},
            "Config":{"Env":["PATH=/bin","A=1","B=2","C=3","D=4","E=5","SECRET=x"]}}]"#;
        let (health, env) = parse_inspect(json);
        assert_eq!(health.as_deref(), Some("healthy"));
        assert_eq!(env, vec!["PATH", "A", "B", "C", "D"]);
    }

    #[test]
    fn inspect_without_healthcheck() {
        let (health, env) = parse_inspect(r#"[{"State":{},"Config":{"Env":null}}]"#);
        assert!(health.is_none());
        assert!(env.is_empty());
        assert_eq!(parse_inspect("not json"), (None, Vec::new()));
    }

    // ── runtime ──

    #[tokio::test]
    async fn list_runs_version_then_ps() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .ok("docker --version", "Docker version 27.0.1")
                .ok("docker ps", "abc\tweb\tnginx\tUp 1 hour\t80/tcp\ndef\tdb\tpostgres\tCreated\t\n"),
        );
        let containers = docker_with(&runner).list_containers().await;
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[1].status, ContainerHealth::Created);
        let calls = runner.calls();
        assert_eq!(calls[0], "docker --version");
        assert!(calls[1].starts_with("docker ps -a --format"));
    }

    #[tokio::test]
    async fn list_fails_closed_without_docker() {
        let runner = Arc::new(ScriptedRunner::new().unavailable("docker --version"));
        let containers = docker_with(&runner).list_containers().await;
        assert!(containers.is_empty());
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn action_success_message() {
        let runner = Arc::new(ScriptedRunner::new().ok("docker restart -- abc", "abc"));
        let msg = docker_with(&runner)
            .run_action("abc", ContainerAction::Restart)
            .await
            .unwrap();
        assert_eq!(msg, "Container restarted successfully");
    }

    #[tokio::test]
    async fn missing_container_is_not_found() {
        let runner = Arc::new(ScriptedRunner::new().exit(
            "docker stop -- nope",
            1,
            "Error response from daemon: No such container: nope",
        ));
        let err = docker_with(&runner)
            .run_action("nope", ContainerAction::Stop)
            .await
            .unwrap_err();
        assert_matches!(err, HostError::NotFound(ref msg) if msg.contains("No such container: nope"));
    }

    #[tokio::test]
    async fn other_failures_are_command_failed() {
        let runner = Arc::new(ScriptedRunner::new().exit("docker start", 1, "permission denied"));
        let err = docker_with(&runner)
            .run_action("abc", ContainerAction::Start)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "docker start -- abc failed: permission denied");
    }

    #[tokio::test]
    async fn logs_pass_tail_and_merge_stderr() {
        let runner = Arc::new(ScriptedRunner::new().output("docker logs", "out line\n", "err line\n", 0));
        let logs = docker_with(&runner).logs("abc", 50).await.unwrap();
        assert_eq!(logs, "out line\nerr line\n");
        assert_eq!(runner.calls(), vec!["docker logs --tail 50 -- abc".to_string()]);
    }

    #[tokio::test]
    async fn stats_combines_inspect() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .ok("docker stats", "2.00%\t100MiB / 1GiB\t9.77%\n")
                .ok("docker inspect", r#"[{"State":{"Health":{"Status":"starting"}},"Config":{"Env":["X=1"]}}]"#),
        );
        let stats = docker_with(&runner).stats("abc").await.unwrap();
        assert_eq!(stats.health.as_deref(), Some("starting"));
        assert_eq!(stats.env_vars, vec!["X"]);
        assert_eq!(stats.memory_bytes, 100 * 1024 * 1024);
    }

    #[tokio::test]
    async fn dash_prefixed_id_is_never_a_flag() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .ok("docker start -- -rf", "")
                .ok("docker stats", "1.00%\t1MiB / 1GiB\t0.10%\n")
                .ok("docker inspect", "[]"),
        );
        let docker = docker_with(&runner);
        docker.run_action("-rf", ContainerAction::Start).await.unwrap();
        let _ = docker.stats("--help").await.unwrap();
        let calls = runner.calls();
        assert_eq!(calls[0], "docker start -- -rf");
        assert!(calls[1].ends_with(" -- --help"));
        assert_eq!(calls[2], "docker inspect -- --help");
    }

    #[tokio::test]
    async fn stats_empty_output_is_error() {
        let runner = Arc::new(ScriptedRunner::new().ok("docker stats", ""));
        let err = docker_with(&runner).stats("abc").await.unwrap_err();
        assert_matches!(err, HostError::Parse { .. });
    }
}
