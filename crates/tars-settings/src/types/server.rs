//! Server network and session settings.

use serde::{Deserialize, Serialize};

/// What to do when a client registers a session key that is already live.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateSessionPolicy {
    /// Refuse the new connection and keep the existing session.
    #[default]
    Reject,
    /// Tear down the existing session and register the new one.
    Replace,
}

impl DuplicateSessionPolicy {
    /// Parse from a case-insensitive name.
    pub fn parse(val: &str) -> Option<Self> {
        match val.to_lowercase().as_str() {
            "reject" => Some(Self::Reject),
            "replace" => Some(Self::Replace),
            _ => None,
        }
    }
}

/// Server network and runtime settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Maximum number of concurrent WebSocket sessions.
    pub max_connections: usize,
    /// Interval between server Ping frames, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Silence after which a client is considered dead, in seconds.
    pub heartbeat_timeout_secs: u64,
    /// Interval between topic publications, in seconds.
    pub publish_interval_secs: u64,
    /// Outbound queue depth per session.
    pub outbound_buffer: usize,
    /// Policy for duplicate session keys.
    pub duplicate_sessions: DuplicateSessionPolicy,
    /// Maximum inbound WebSocket message size, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_connections: 50,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            publish_interval_secs: 5,
            outbound_buffer: 256,
            duplicate_sessions: DuplicateSessionPolicy::Reject,
            max_message_size: 1024 * 1024,
        }
    }
}
