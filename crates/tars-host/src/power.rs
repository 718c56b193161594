//! Host power control via `shutdown(8)`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tars_settings::HostSettings;
use tracing::{info, warn};

use crate::command::{CommandRunner, render};
use crate::errors::{HostError, Result};
use crate::traits::PowerControl;
use crate::types::PowerAction;

const PRE_STOP_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Reboots or halts the machine, optionally stopping managed containers first.
pub struct SystemPower {
    runner: Arc<dyn CommandRunner>,
    pre_stop: Option<Vec<String>>,
    grace: Duration,
}

impl SystemPower {
    /// Build from host settings.
    pub fn new(runner: Arc<dyn CommandRunner>, settings: &HostSettings) -> Self {
        Self {
            runner,
            pre_stop: settings.pre_stop_command.clone().filter(|c| !c.is_empty()),
            grace: Duration::from_secs(settings.power_grace_secs),
        }
    }

    /// Returns whether a pre-stop command was attempted. Its failures are
    /// only logged.
    async fn run_pre_stop(&self) -> bool {
        let Some((program, rest)) = self.pre_stop.as_ref().and_then(|c| c.split_first()) else {
            return false;
        };
        let args: Vec<&str> = rest.iter().map(String::as_str).collect();
        info!(command = %render(program, &args), "stopping managed containers before power action");
        match self.runner.run(program, &args, PRE_STOP_TIMEOUT).await {
            Ok(out) if out.success() => {}
            Ok(out) => {
                warn!(exit_code = out.exit_code, stderr = %out.diagnostic(), "pre-stop command failed");
            }
            Err(e) => warn!(error = %e, "could not run pre-stop command"),
        }
        true
    }
}

#[async_trait]
impl PowerControl for SystemPower {
    async fn execute(&self, action: PowerAction) -> Result<String> {
        let ran_pre_stop = self.run_pre_stop().await;
        if ran_pre_stop && !self.grace.is_zero() {
            tokio::time::sleep(self.grace).await;
        }

        let args = [action.shutdown_flag(), "+0"];
        let out = self.runner.run("shutdown", &args, SHUTDOWN_TIMEOUT).await?;
        if !out.success() {
            return Err(HostError::CommandFailed {
                command: render("shutdown", &args),
                stderr: out.diagnostic(),
            });
        }

        let what = match action {
            PowerAction::Reboot => "System rebooting",
            PowerAction::Shutdown => "System shutting down",
        };
        info!(?action, "power action issued");
        Ok(if ran_pre_stop {
            format!("Containers stopped. {what}")
        } else {
            what.to_string()
        })
    }
}
