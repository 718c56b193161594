//! # tars-host
//!
//! Host collaborators used by the TARS server: system metrics, process
//! control, the container runtime, compose-managed apps, power actions, and
//! network counters.
//!
//! The server only sees the traits in [`traits`]; [`HostServices`] bundles
//! one implementation of each. [`HostServices::from_settings`] wires the real
//! ones (`sysinfo`, the docker CLI, `shutdown(8)`). In-memory versions live in
//! `stubs`, compiled only for tests or with the `test-util` feature.

#![deny(unsafe_code)]

pub mod apps;
pub mod command;
pub mod docker;
pub mod errors;
pub mod power;
#[cfg(any(test, feature = "test-util"))]
pub mod stubs;
pub mod system;
pub mod traits;
pub mod types;

use std::sync::Arc;

use tars_settings::HostSettings;

pub use errors::{HostError, Result};
pub use traits::{
    AppRuntime, ContainerRuntime, MetricsSource, NetworkSource, PowerControl, ProcessControl,
};
pub use types::*;

/// One implementation of every host collaborator.
#[derive(Clone)]
pub struct HostServices {
    /// System info and utilisation.
    pub metrics: Arc<dyn MetricsSource>,
    /// Process listing and termination.
    pub processes: Arc<dyn ProcessControl>,
    /// Container runtime.
    pub containers: Arc<dyn ContainerRuntime>,
    /// Compose-managed TARS apps.
    pub apps: Arc<dyn AppRuntime>,
    /// Reboot / shutdown.
    pub power: Arc<dyn PowerControl>,
    /// Network counters.
    pub network: Arc<dyn NetworkSource>,
}

impl HostServices {
    /// Real collaborators for the local machine.
    pub fn from_settings(settings: &HostSettings) -> Self {
        let runner: Arc<dyn command::CommandRunner> = Arc::new(command::TokioCommandRunner);
        let host = Arc::new(system::SysinfoHost::new(settings));
        Self {
            metrics: host.clone(),
            processes: host.clone(),
            containers: Arc::new(docker::DockerCli::new(runner.clone(), settings)),
            apps: Arc::new(apps::ComposeApps::new(runner.clone(), settings)),
            power: Arc::new(power::SystemPower::new(runner, settings)),
            network: host,
        }
    }
}
