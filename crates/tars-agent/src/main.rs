//! # tars-agent
//!
//! TARS backend binary: loads settings, wires the host collaborators into the
//! server, and runs until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tars_host::HostServices;
use tars_server::config::ServerConfig;
use tars_server::server::TarsServer;
use tars_settings::TarsSettings;

/// Grace period for sessions and the publisher after a shutdown signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// TARS host-monitoring backend.
#[derive(Parser, Debug)]
#[command(name = "tars-agent", about = "TARS host-monitoring backend")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings, 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.tars/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level or filter directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// Fold command-line flags over loaded settings.
    fn apply(&self, settings: &mut TarsSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(tars_settings::settings_path);
    let mut settings = tars_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);

    tars_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);
    tracing::info!(path = %settings_path.display(), "settings loaded");

    let metrics_handle =
        tars_server::metrics::install_recorder().context("Failed to install metrics recorder")?;

    let host = HostServices::from_settings(&settings.host);
    let server = TarsServer::new(ServerConfig::from(&settings.server), host, metrics_handle);

    let (addr, server_handle) = server.listen().await.context("Failed to bind server")?;
    let publisher_handle = server.spawn_publisher();
    tracing::info!("TARS backend listening on http://{addr}");

    wait_for_signal().await?;

    tracing::info!("Shutting down...");
    server.registry().clear();
    let report = server
        .shutdown()
        .graceful_shutdown(vec![server_handle, publisher_handle], Some(SHUTDOWN_TIMEOUT))
        .await;

    tracing::info!(
        completed = report.completed,
        aborted = report.aborted,
        "Shutdown complete"
    );
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on Unix.
async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for ctrl-c")
    }
}
