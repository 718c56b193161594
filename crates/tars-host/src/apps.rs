//! TARS apps managed with `docker compose`.
//!
//! An app is a directory under the apps root that holds a
//! `docker-compose.yml`. The directory name is the app name.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tars_settings::HostSettings;
use tracing::{debug, info, warn};

use crate::command::{CommandOutput, CommandRunner, render};
use crate::errors::{HostError, Result};
use crate::traits::AppRuntime;
use crate::types::{AppContainer, AppHealth, AppSummary, ContainerAction};

const COMPOSE_FILE: &str = "docker-compose.yml";

/// Apps driven through `docker compose -f <app>/docker-compose.yml`.
pub struct ComposeApps {
    runner: Arc<dyn CommandRunner>,
    bin: String,
    apps_dir: PathBuf,
    command_timeout: Duration,
    action_timeout: Duration,
}

impl ComposeApps {
    /// Build from host settings.
    pub fn new(runner: Arc<dyn CommandRunner>, settings: &HostSettings) -> Self {
        Self {
            runner,
            bin: settings.docker_bin.clone(),
            apps_dir: PathBuf::from(&settings.apps_dir),
            command_timeout: Duration::from_secs(settings.command_timeout_secs),
            action_timeout: Duration::from_secs(settings.app_action_timeout_secs),
        }
    }

    /// Compose file of a known app.
    ///
    /// Names that are not a single path component never resolve.
    async fn compose_file(&self, app_name: &str) -> Result<PathBuf> {
        let not_found = || HostError::NotFound(format!("Application {app_name} not found"));
        if !is_plain_name(app_name) {
            return Err(not_found());
        }
        let file = self.apps_dir.join(app_name).join(COMPOSE_FILE);
        match tokio::fs::try_exists(&file).await {
            Ok(true) => Ok(file),
            _ => Err(not_found()),
        }
    }

    async fn compose(&self, file: &Path, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let file = file.to_string_lossy();
        let mut full = vec!["compose", "-f", file.as_ref()];
        full.extend_from_slice(args);
        let out = self.runner.run(&self.bin, &full, timeout).await?;
        if out.success() {
            Ok(out)
        } else {
            Err(HostError::CommandFailed {
                command: render(&self.bin, &full),
                stderr: out.diagnostic(),
            })
        }
    }

    async fn containers(&self, file: &Path) -> Result<Vec<AppContainer>> {
        let out = self
            .compose(file, &["ps", "--all", "--format", "json"], self.command_timeout)
            .await?;
        Ok(parse_compose_ps(&out.stdout))
    }

    async fn app_names(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.apps_dir).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                HostError::Unavailable(format!("apps directory {}", self.apps_dir.display()))
            } else {
                HostError::Io(e)
            }
        })?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if tokio::fs::try_exists(entry.path().join(COMPOSE_FILE)).await.unwrap_or(false) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl AppRuntime for ComposeApps {
    async fn list_apps(&self) -> Result<Vec<AppSummary>> {
        let names = self.app_names().await?;
        let mut apps = Vec::with_capacity(names.len());
        for name in names {
            let file = self.apps_dir.join(&name).join(COMPOSE_FILE);
            let app = match self.containers(&file).await {
                Ok(containers) => AppSummary::from_containers(name, containers),
                Err(e @ HostError::CommandFailed { .. }) => {
                    debug!(app = %name, error = %e, "compose ps failed, reporting stopped");
                    AppSummary::from_containers(name, Vec::new())
                }
                Err(e) => {
                    warn!(app = %name, error = %e, "app status unavailable");
                    AppSummary::unknown(name)
                }
            };
            apps.push(app);
        }
        Ok(apps)
    }

    async fn run_app_action(&self, app_name: &str, action: ContainerAction) -> Result<String> {
        let file = self.compose_file(app_name).await?;
        let args: &[&str] = match action {
            ContainerAction::Start => &["up", "-d"],
            ContainerAction::Stop => &["stop"],
            ContainerAction::Restart => &["restart"],
        };
        info!(app = app_name, %action, "running app action");
        let _ = self.compose(&file, args, self.action_timeout).await?;
        Ok(format!("Application {app_name} {} successfully", action.past_tense()))
    }

    async fn app_health(&self, app_name: &str) -> Result<AppHealth> {
        let file = self.compose_file(app_name).await?;
        let containers = self.containers(&file).await?;
        Ok(AppHealth::from_containers(app_name, containers))
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('-')
        && !name.contains(['/', '\\', '\0'])
}

/// Parse `docker compose ps --format json`.
///
/// Newer compose prints one object per line, older releases a single array.
/// Rows that are not JSON objects are skipped.
pub fn parse_compose_ps(stdout: &str) -> Vec<AppContainer> {
    let trimmed = stdout.trim();
    if trimmed.starts_with('[') {
        return serde_json::from_str::<Vec<Value>>(trimmed)
            .map(|rows| rows.iter().filter_map(app_container).collect())
            .unwrap_or_default();
    }
    trimmed
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
        .filter_map(|row| app_container(&row))
        .collect()
}

fn app_container(row: &Value) -> Option<AppContainer> {
    let row = row.as_object()?;
    let text = |key: &str| row.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    let uptime = ["RunningFor", "Status"]
        .into_iter()
        .map(text)
        .find(|v| !v.is_empty())
        .unwrap_or_default();
    Some(AppContainer {
        name: text("Name"),
        status: text("State"),
        ports: text("Ports"),
        health: text("Health"),
        uptime,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stubs::ScriptedRunner;
    use crate::types::{AppHealthStatus, AppStatus};
    use assert_matches::assert_matches;

    const WEB_UP: &str = r#"{"Name":"media-web-1","State":"running","Ports":"0.0.0.0:80->80/tcp","Health":"healthy","RunningFor":"2 hours ago"}"#;
    const DB_DOWN: &str = r#"{"Name":"media-db-1","State":"exited","Ports":"","Health":"","Status":"Exited (0) 5 minutes ago"}"#;

    struct Fixture {
        dir: tempfile::TempDir,
        settings: HostSettings,
    }

    fn fixture(apps: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        for app in apps {
            let app_dir = dir.path().join(app);
            std::fs::create_dir(&app_dir).unwrap();
            std::fs::write(app_dir.join(COMPOSE_FILE), "services: {}\n").unwrap();
        }
        // neither a plain file nor a directory without a compose file is an app
        std::fs::write(dir.path().join("README.md"), "apps").unwrap();
        std::fs::create_dir(dir.path().join("scratch")).unwrap();
        let settings = HostSettings {
            apps_dir: dir.path().to_string_lossy().into_owned(),
            ..HostSettings::default()
        };
        Fixture { dir, settings }
    }

    impl Fixture {
        fn ps(&self, app: &str) -> String {
            let file = self.dir.path().join(app).join(COMPOSE_FILE);
            format!("docker compose -f {} ps", file.display())
        }

        fn apps(&self, runner: &Arc<ScriptedRunner>) -> ComposeApps {
            ComposeApps::new(runner.clone(), &self.settings)
        }
    }

    // ── parser ──

    #[test]
    fn ps_lines_parsed() {
        let containers = parse_compose_ps(&format!("{WEB_UP}\n\nnot json\n{DB_DOWN}\n"));
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].name, "media-web-1");
        assert_eq!(containers[0].ports, "0.0.0.0:80->80/tcp");
        assert_eq!(containers[0].uptime, "2 hours ago");
        assert!(containers[0].is_running());
        assert_eq!(containers[1].uptime, "Exited (0) 5 minutes ago");
        assert!(!containers[1].is_running());
    }

    #[test]
    fn ps_array_parsed() {
        let containers = parse_compose_ps(&format!("[{WEB_UP},{DB_DOWN}]"));
        assert_eq!(containers.len(), 2);
        assert!(parse_compose_ps("").is_empty());
        assert!(parse_compose_ps("[1, 2]").is_empty());
    }

    #[test]
    fn plain_names_only() {
        assert!(is_plain_name("media"));
        assert!(is_plain_name("home-assistant"));
        for bad in ["", ".", "..", "../etc", "a/b", "-rf", "a\\b"] {
            assert!(!is_plain_name(bad), "{bad:?} accepted");
        }
    }

    // ── runtime ──

    #[tokio::test]
    async fn list_reports_each_compose_app() {
        let f = fixture(&["media", "backup"]);
        let runner = Arc::new(
            ScriptedRunner::new()
                .ok(&f.ps("media"), &format!("{WEB_UP}\n{DB_DOWN}\n"))
                .exit(&f.ps("backup"), 1, "no configuration file provided"),
        );
        let apps = f.apps(&runner).list_apps().await.unwrap();
        assert_eq!(apps.len(), 2);

        assert_eq!(apps[0].name, "backup");
        assert_eq!(apps[0].status, AppStatus::Stopped);
        assert_eq!(apps[0].total_containers, 0);

        assert_eq!(apps[1].name, "media");
        assert_eq!(apps[1].status, AppStatus::Partial);
        assert_eq!(apps[1].running_containers, 1);
        assert_eq!(apps[1].total_containers, 2);

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.ends_with("ps --all --format json")));
    }

    #[tokio::test]
    async fn list_marks_unreachable_docker_unknown() {
        let f = fixture(&["media"]);
        let runner = Arc::new(ScriptedRunner::new().timeout("docker compose"));
        let apps = f.apps(&runner).list_apps().await.unwrap();
        assert_eq!(apps[0].status, AppStatus::Unknown);
    }

    #[tokio::test]
    async fn list_without_apps_dir_fails() {
        let settings = HostSettings {
            apps_dir: "/nonexistent/tars/apps".into(),
            ..HostSettings::default()
        };
        let runner = Arc::new(ScriptedRunner::new());
        let err = ComposeApps::new(runner.clone(), &settings).list_apps().await.unwrap_err();
        assert_matches!(err, HostError::Unavailable(ref what) if what.contains("/nonexistent/tars/apps"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn actions_map_to_compose_verbs() {
        let f = fixture(&["media"]);
        let runner = Arc::new(ScriptedRunner::new());
        let apps = f.apps(&runner);
        let msg = apps.run_app_action("media", ContainerAction::Start).await.unwrap();
        assert_eq!(msg, "Application media started successfully");
        let _ = apps.run_app_action("media", ContainerAction::Stop).await.unwrap();
        let msg = apps.run_app_action("media", ContainerAction::Restart).await.unwrap();
        assert_eq!(msg, "Application media restarted successfully");

        let file = f.dir.path().join("media").join(COMPOSE_FILE);
        let prefix = format!("docker compose -f {}", file.display());
        assert_eq!(
            runner.calls(),
            vec![
                format!("{prefix} up -d"),
                format!("{prefix} stop"),
                format!("{prefix} restart"),
            ]
        );
    }

    #[tokio::test]
    async fn action_failure_carries_stderr() {
        let f = fixture(&["media"]);
        let runner = Arc::new(ScriptedRunner::new().exit("docker compose", 1, "pull access denied"));
        let err = f
            .apps(&runner)
            .run_app_action("media", ContainerAction::Start)
            .await
            .unwrap_err();
        assert_matches!(err, HostError::CommandFailed { ref stderr, .. } if stderr == "pull access denied");
    }

    #[tokio::test]
    async fn unknown_or_unsafe_app_is_not_found() {
        let f = fixture(&["media"]);
        let runner = Arc::new(ScriptedRunner::new());
        let apps = f.apps(&runner);
        for name in ["ghost", "scratch", "..", "../media", "-p"] {
            let err = apps.run_app_action(name, ContainerAction::Stop).await.unwrap_err();
            assert_eq!(err.to_string(), format!("Application {name} not found"));
            assert_matches!(apps.app_health(name).await, Err(HostError::NotFound(_)));
        }
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn health_grades_containers() {
        let f = fixture(&["media"]);
        let unhealthy = WEB_UP.replace(r#""healthy""#, r#""unhealthy""#);
        let runner = Arc::new(ScriptedRunner::new().ok(&f.ps("media"), &format!("{unhealthy}\n{DB_DOWN}\n")));
        let health = f.apps(&runner).app_health("media").await.unwrap();
        assert_eq!(health.app_name, "media");
        assert_eq!(health.status, AppHealthStatus::Unhealthy);
        assert_eq!(health.summary.running, 1);
        assert_eq!(health.summary.stopped, 1);
        assert_eq!(health.summary.unhealthy, 1);
        assert_eq!(health.containers.len(), 2);
    }
}
