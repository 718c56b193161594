//! Wire messages exchanged over the WebSocket.
//!
//! Both directions are JSON objects discriminated by a `type` field.
//! Inbound messages with an unrecognized `type` decode to
//! [`ClientMessage::Unknown`] and are ignored by the dispatcher.

use serde::{Deserialize, Serialize};
use tars_host::{ContainerAction, ContainerInfo, NetworkStats, ProcessInfo, SystemMetrics};

/// Default `limit` for `get_processes`.
pub const DEFAULT_PROCESS_LIMIT: usize = 20;
/// Default `tail` for `get_container_logs`.
pub const DEFAULT_LOG_TAIL: usize = 100;

fn default_process_limit() -> usize {
    DEFAULT_PROCESS_LIMIT
}

fn default_log_tail() -> usize {
    DEFAULT_LOG_TAIL
}

/// Client → server.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Add a topic to this session's subscription set.
    Subscribe {
        /// Topic name.
        topic: String,
    },
    /// Remove a topic from this session's subscription set.
    Unsubscribe {
        /// Topic name.
        topic: String,
    },
    /// One `system_info` reply.
    GetSystemInfo,
    /// One `metrics` reply.
    GetMetrics,
    /// One `processes_data` reply.
    GetProcesses {
        /// Maximum rows.
        #[serde(default = "default_process_limit")]
        limit: usize,
    },
    /// Terminate a process.
    KillProcess {
        /// Target pid.
        pid: u32,
    },
    /// One `containers_data` reply.
    GetContainers,
    /// Background container lifecycle action.
    ContainerAction {
        /// Container id or name.
        container_id: String,
        /// `start`, `stop` or `restart`.
        action: ContainerAction,
    },
    /// Background log fetch.
    GetContainerLogs {
        /// Container id or name.
        container_id: String,
        /// Lines from the end.
        #[serde(default = "default_log_tail")]
        tail: usize,
        /// Accepted, but only a snapshot is ever delivered.
        #[serde(default)]
        follow: bool,
    },
    /// One `network_stats` reply.
    GetNetworkStats,
    /// Any other `type`.
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// The wire `type` tag, for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::GetSystemInfo => "get_system_info",
            Self::GetMetrics => "get_metrics",
            Self::GetProcesses { .. } => "get_processes",
            Self::KillProcess { .. } => "kill_process",
            Self::GetContainers => "get_containers",
            Self::ContainerAction { .. } => "container_action",
            Self::GetContainerLogs { .. } => "get_container_logs",
            Self::GetNetworkStats => "get_network_stats",
            Self::Unknown => "unknown",
        }
    }
}

/// Decode one inbound text frame.
///
/// The error string is ready to be sent back as an `error` message.
pub fn decode(text: &str) -> Result<ClientMessage, String> {
    serde_json::from_str(text).map_err(|e| format!("Invalid message: {e}"))
}

/// Progress of a background container action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Accepted, running.
    InProgress,
    /// Completed.
    Success,
    /// Failed.
    Error,
}

/// Server → client.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First message after a successful registration.
    ConnectionEstablished {
        /// The session key in effect.
        session_id: String,
        /// RFC 3339 server time.
        timestamp: String,
    },
    /// Host facts.
    SystemInfo {
        /// Payload.
        data: tars_host::SystemInfo,
    },
    /// Utilisation snapshot.
    Metrics {
        /// Payload.
        data: SystemMetrics,
    },
    /// Process table.
    ProcessesData {
        /// Payload.
        data: Vec<ProcessInfo>,
    },
    /// Outcome of `kill_process`.
    ProcessKillResult {
        /// Target pid.
        pid: u32,
        /// Whether the process was killed.
        success: bool,
        /// Human-readable outcome.
        message: String,
    },
    /// Container list.
    ContainersData {
        /// Payload.
        data: Vec<ContainerInfo>,
    },
    /// Progress or outcome of `container_action`.
    ContainerActionResult {
        /// Target container.
        container_id: String,
        /// Requested action.
        action: ContainerAction,
        /// `in_progress`, `success` or `error`.
        status: ActionStatus,
        /// Human-readable detail.
        message: String,
    },
    /// Log snapshot.
    ContainerLogs {
        /// Target container.
        container_id: String,
        /// Log text, at most `tail` lines.
        logs: String,
        /// Requested line count.
        tail: usize,
        /// Always `false`: streaming is not supported.
        follow: bool,
    },
    /// Log fetch failure.
    ContainerLogsError {
        /// Target container.
        container_id: String,
        /// Failure detail.
        error: String,
    },
    /// Network counters.
    NetworkStats {
        /// Payload.
        data: NetworkStats,
    },
    /// Generic failure.
    Error {
        /// Failure detail.
        message: String,
    },
}

impl ServerMessage {
    /// Build an `error` message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Build a `connection_established` message stamped with the current time.
    pub fn connection_established(session_id: &str) -> Self {
        Self::ConnectionEstablished {
            session_id: session_id.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Serialize to JSON text.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn to_value(msg: &ServerMessage) -> Value {
        serde_json::from_str(&msg.to_json().unwrap()).unwrap()
    }

    // ── inbound ──

    #[test]
    fn decode_container_action() {
        let msg = decode(r#"{"type":"container_action","container_id":"abc","action":"restart"}"#)
            .unwrap();
        assert_eq!(
            msg,
            ClientMessage::ContainerAction {
                container_id: "abc".into(),
                action: ContainerAction::Restart,
            }
        );
        assert_eq!(msg.kind(), "container_action");
    }

    #[test]
    fn decode_defaults() {
        assert_eq!(
            decode(r#"{"type":"get_processes"}"#).unwrap(),
            ClientMessage::GetProcesses { limit: 20 }
        );
        assert_eq!(
            decode(r#"{"type":"get_container_logs","container_id":"abc"}"#).unwrap(),
            ClientMessage::GetContainerLogs {
                container_id: "abc".into(),
                tail: 100,
                follow: false,
            }
        );
    }

    #[test]
    fn decode_unit_variant_ignores_extra_fields() {
        assert_eq!(
            decode(r#"{"type":"get_metrics","extra":1}"#).unwrap(),
            ClientMessage::GetMetrics
        );
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        assert_eq!(decode(r#"{"type":"launch_rocket"}"#).unwrap(), ClientMessage::Unknown);
    }

    #[test]
    fn garbage_is_an_error() {
        let err = decode("not json at all").unwrap_err();
        assert!(err.starts_with("Invalid message: "));
    }

    #[test]
    fn missing_type_is_an_error() {
        assert!(decode(r#"{"topic":"metrics"}"#).is_err());
        assert!(decode("42").is_err());
    }

    #[test]
    fn missing_required_field_is_an_error() {
        assert!(decode(r#"{"type":"kill_process"}"#).is_err());
        assert!(decode(r#"{"type":"subscribe"}"#).is_err());
    }

    #[test]
    fn invalid_action_is_an_error() {
        let err =
            decode(r#"{"type":"container_action","container_id":"abc","action":"explode"}"#)
                .unwrap_err();
        assert!(err.contains("explode"));
    }

    // ── outbound ──

    #[test]
    fn action_result_shape() {
        let msg = ServerMessage::ContainerActionResult {
            container_id: "abc".into(),
            action: ContainerAction::Restart,
            status: ActionStatus::InProgress,
            message: "Restart requested...".into(),
        };
        assert_eq!(
            to_value(&msg),
            json!({
                "type": "container_action_result",
                "container_id": "abc",
                "action": "restart",
                "status": "in_progress",
                "message": "Restart requested...",
            })
        );
    }

    #[test]
    fn error_shape() {
        assert_eq!(
            to_value(&ServerMessage::error("Failed to kill process: Process not found")),
            json!({"type": "error", "message": "Failed to kill process: Process not found"})
        );
    }

    #[test]
    fn logs_shape() {
        let msg = ServerMessage::ContainerLogs {
            container_id: "abc".into(),
            logs: "a\nb\n".into(),
            tail: 2,
            follow: false,
        };
        let v = to_value(&msg);
        assert_eq!(v["type"], "container_logs");
        assert_eq!(v["tail"], 2);
        assert_eq!(v["follow"], false);
    }

    #[test]
    fn connection_established_shape() {
        let v = to_value(&ServerMessage::connection_established("c1"));
        assert_eq!(v["type"], "connection_established");
        assert_eq!(v["session_id"], "c1");
        assert!(v["timestamp"].is_string());
    }
}
