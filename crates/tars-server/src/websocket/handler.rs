//! Inbound message dispatch.
//!
//! One [`Dispatcher::handle`] call per inbound frame, awaited in order by the
//! session loop. Quick requests call a collaborator and reply directly;
//! container actions and log fetches go to the [`TaskSupervisor`].

use std::sync::Arc;

use metrics::counter;
use tars_host::HostServices;
use tracing::{debug, info, instrument, warn};

use super::protocol::{ClientMessage, ServerMessage, decode};
use super::registry::{SessionHandle, SessionRegistry};
use super::supervisor::TaskSupervisor;
use crate::metrics::WS_MESSAGES_TOTAL;

/// Routes decoded client messages.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    host: HostServices,
    supervisor: TaskSupervisor,
}

impl Dispatcher {
    /// Dispatcher replying through `registry`.
    pub fn new(registry: Arc<SessionRegistry>, host: HostServices) -> Self {
        let supervisor = TaskSupervisor::new(Arc::clone(&registry), host.clone());
        Self {
            registry,
            host,
            supervisor,
        }
    }

    /// Handle one inbound text frame.
    ///
    /// Never fails: decode and collaborator errors become `error` replies.
    #[instrument(skip_all, fields(session_id = %session.key, kind))]
    pub async fn handle(&self, session: &SessionHandle, text: &str) {
        if !self.registry.is_current(session) {
            debug!("session no longer registered, ignoring message");
            return;
        }
        let msg = match decode(text) {
            Ok(msg) => msg,
            Err(reason) => {
                warn!(%reason, "undecodable message");
                counter!(WS_MESSAGES_TOTAL, "type" => "invalid").increment(1);
                self.reply(session, ServerMessage::error(reason));
                return;
            }
        };
        let kind = msg.kind();
        let _ = tracing::Span::current().record("kind", kind);
        counter!(WS_MESSAGES_TOTAL, "type" => kind).increment(1);
        self.dispatch(session, msg).await;
    }

    async fn dispatch(&self, session: &SessionHandle, msg: ClientMessage) {
        let key = session.key.as_str();
        match msg {
            ClientMessage::Subscribe { topic } => {
                info!(%topic, "subscribed");
                self.registry.subscribe(key, &topic);
            }
            ClientMessage::Unsubscribe { topic } => {
                info!(%topic, "unsubscribed");
                self.registry.unsubscribe(key, &topic);
            }
            ClientMessage::GetSystemInfo => {
                let reply = match self.host.metrics.system_info().await {
                    Ok(data) => ServerMessage::SystemInfo { data },
                    Err(e) => ServerMessage::error(format!("Failed to fetch system info: {e}")),
                };
                self.reply(session, reply);
            }
            ClientMessage::GetMetrics => {
                let reply = match self.host.metrics.metrics().await {
                    Ok(data) => ServerMessage::Metrics { data },
                    Err(e) => ServerMessage::error(format!("Failed to fetch metrics: {e}")),
                };
                self.reply(session, reply);
            }
            ClientMessage::GetProcesses { limit } => {
                let data = self.host.processes.list_processes(limit).await;
                self.reply(session, ServerMessage::ProcessesData { data });
            }
            ClientMessage::KillProcess { pid } => {
                let reply = match self.host.processes.kill_process(pid).await {
                    Ok(success) => ServerMessage::ProcessKillResult {
                        pid,
                        success,
                        message: if success {
                            format!("Process {pid} killed")
                        } else {
                            format!("Process {pid} failed to kill")
                        },
                    },
                    Err(e) => ServerMessage::error(format!("Failed to kill process: {e}")),
                };
                self.reply(session, reply);
            }
            ClientMessage::GetContainers => {
                let data = self.host.containers.list_containers().await;
                self.reply(session, ServerMessage::ContainersData { data });
            }
            ClientMessage::ContainerAction {
                container_id,
                action,
            } => {
                let _ = self.supervisor.container_action(session, container_id, action);
            }
            ClientMessage::GetContainerLogs {
                container_id,
                tail,
                follow,
            } => {
                let _ = self
                    .supervisor
                    .container_logs(session, container_id, tail, follow);
            }
            ClientMessage::GetNetworkStats => {
                let reply = match self.host.network.network_stats().await {
                    Ok(data) => ServerMessage::NetworkStats { data },
                    Err(e) => ServerMessage::error(format!("Failed to fetch network stats: {e}")),
                };
                self.reply(session, reply);
            }
            ClientMessage::Unknown => debug!("unknown message type ignored"),
        }
    }

    fn reply(&self, session: &SessionHandle, msg: ServerMessage) {
        if !self.registry.reply(session, &msg) {
            debug!("reply not queued");
        }
    }
}
