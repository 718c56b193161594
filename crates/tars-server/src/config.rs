//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tars_settings::{DuplicateSessionPolicy, ServerSettings};

/// Configuration for the TARS server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket sessions.
    pub max_connections: usize,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close a session after this many seconds without Pong.
    pub heartbeat_timeout_secs: u64,
    /// Topic publication interval in seconds.
    pub publish_interval_secs: u64,
    /// Outbound queue depth per session.
    pub outbound_buffer: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Policy for duplicate session keys.
    pub duplicate_sessions: DuplicateSessionPolicy,
    /// Process count used when a request does not name one.
    pub default_process_limit: usize,
}

impl ServerConfig {
    /// Heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Heartbeat timeout.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Publication interval.
    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 50,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            publish_interval_secs: 5,
            outbound_buffer: 256,
            max_message_size: 1024 * 1024,
            duplicate_sessions: DuplicateSessionPolicy::Reject,
            default_process_limit: 20,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_connections: s.max_connections,
            heartbeat_interval_secs: s.heartbeat_interval_secs,
            heartbeat_timeout_secs: s.heartbeat_timeout_secs,
            publish_interval_secs: s.publish_interval_secs,
            outbound_buffer: s.outbound_buffer,
            max_message_size: s.max_message_size,
            duplicate_sessions: s.duplicate_sessions,
            ..Self::default()
        }
    }
}
