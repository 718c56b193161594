//! Host collaborator settings.

use serde::{Deserialize, Serialize};

/// Settings for the docker CLI, process control, and power actions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostSettings {
    /// Docker executable name or path.
    pub docker_bin: String,
    /// Timeout for short docker queries (`ps`, `stats`, `inspect`), in seconds.
    pub command_timeout_secs: u64,
    /// Timeout for `docker start|stop|restart`, in seconds.
    pub action_timeout_secs: u64,
    /// Timeout for `docker logs`, in seconds.
    pub logs_timeout_secs: u64,
    /// How long a terminated process gets before it is killed, in seconds.
    pub kill_grace_secs: u64,
    /// Command run before reboot/shutdown to stop managed containers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_stop_command: Option<Vec<String>>,
    /// Pause between the pre-stop command and the power action, in seconds.
    pub power_grace_secs: u64,
    /// Directory holding one `<app>/docker-compose.yml` per TARS app.
    pub apps_dir: String,
    /// Timeout for `docker compose up|stop|restart` on an app, in seconds.
    pub app_action_timeout_secs: u64,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            command_timeout_secs: 10,
            action_timeout_secs: 30,
            logs_timeout_secs: 15,
            kill_grace_secs: 5,
            pre_stop_command: None,
            power_grace_secs: 3,
            apps_dir: "apps".to_string(),
            app_action_timeout_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_stop_omitted_when_unset() {
        let json = serde_json::to_value(HostSettings::default()).unwrap();
        assert!(json.get("preStopCommand").is_none());
    }

    #[test]
    fn pre_stop_parsed_from_json() {
        let host: HostSettings =
            serde_json::from_str(r#"{"preStopCommand": ["/root/tars", "stop", "all"]}"#).unwrap();
        assert_eq!(
            host.pre_stop_command.as_deref(),
            Some(&["/root/tars".to_string(), "stop".into(), "all".into()][..])
        );
        assert_eq!(host.action_timeout_secs, 30);
    }

    #[test]
    fn apps_dir_parsed_from_json() {
        let host: HostSettings = serde_json::from_str(r#"{"appsDir": "/root/tars/apps"}"#).unwrap();
        assert_eq!(host.apps_dir, "/root/tars/apps");
        assert_eq!(host.app_action_timeout_secs, 60);
    }
}
