//! Settings type definitions.

mod host;
mod server;

pub use host::HostSettings;
pub use server::{DuplicateSessionPolicy, ServerSettings};

use serde::{Deserialize, Serialize};

/// Root settings object, mirroring `~/.tars/settings.json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TarsSettings {
    /// HTTP / WebSocket server settings.
    pub server: ServerSettings,
    /// Host collaborator settings (docker, power, process control).
    pub host: HostSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Filter directive passed to the tracing subscriber.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
