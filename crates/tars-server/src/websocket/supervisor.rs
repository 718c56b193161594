//! Background container actions and log fetches.
//!
//! Each session owns at most one task slot in the registry. Starting a task
//! replaces and cancels the previous one. The spawned future races the
//! collaborator call against its cancellation token, and every push goes
//! through [`SessionRegistry::deliver_from_task`], so a superseded or
//! orphaned task can never reach the client.

use std::sync::Arc;

use metrics::counter;
use tars_host::{ContainerAction, HostServices};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span};

use super::protocol::{ActionStatus, ServerMessage};
use super::registry::{SessionHandle, SessionRegistry, TaskTicket};
use crate::metrics::BACKGROUND_TASKS_TOTAL;

/// Starts and tracks per-session background tasks.
#[derive(Clone)]
pub struct TaskSupervisor {
    registry: Arc<SessionRegistry>,
    host: HostServices,
}

impl TaskSupervisor {
    /// Supervisor delivering through `registry`.
    pub fn new(registry: Arc<SessionRegistry>, host: HostServices) -> Self {
        Self { registry, host }
    }

    /// Run a container lifecycle action in the background.
    ///
    /// The `in_progress` message is queued before this returns.
    pub fn container_action(
        &self,
        session: &SessionHandle,
        container_id: String,
        action: ContainerAction,
    ) -> Option<JoinHandle<()>> {
        let ticket = self.registry.begin_task(session)?;
        counter!(BACKGROUND_TASKS_TOTAL, "kind" => "container_action").increment(1);

        let progress = ServerMessage::ContainerActionResult {
            container_id: container_id.clone(),
            action,
            status: ActionStatus::InProgress,
            message: format!("{} requested...", action.title()),
        };
        let _ = self.registry.deliver_from_task(&ticket, &progress, false);

        let registry = Arc::clone(&self.registry);
        let containers = Arc::clone(&self.host.containers);
        let span = info_span!("container_action", session_id = %ticket.key, task = ticket.id, container_id = %container_id, %action);
        Some(tokio::spawn(
            async move {
                let result = tokio::select! {
                    biased;
                    () = ticket.cancel.cancelled() => {
                        debug!("container action cancelled");
                        return;
                    }
                    result = containers.run_action(&container_id, action) => result,
                };
                let (status, message) = match result {
                    Ok(message) => (ActionStatus::Success, message),
                    Err(e) => (ActionStatus::Error, e.to_string()),
                };
                let terminal = ServerMessage::ContainerActionResult {
                    container_id,
                    action,
                    status,
                    message,
                };
                finish(&registry, &ticket, &terminal);
            }
            .instrument(span),
        ))
    }

    /// Fetch a log snapshot in the background.
    pub fn container_logs(
        &self,
        session: &SessionHandle,
        container_id: String,
        tail: usize,
        follow: bool,
    ) -> Option<JoinHandle<()>> {
        let ticket = self.registry.begin_task(session)?;
        counter!(BACKGROUND_TASKS_TOTAL, "kind" => "container_logs").increment(1);
        if follow {
            info!(session_id = %ticket.key, container_id = %container_id, "log follow requested, sending snapshot only");
        }

        let registry = Arc::clone(&self.registry);
        let containers = Arc::clone(&self.host.containers);
        let span = info_span!("container_logs", session_id = %ticket.key, task = ticket.id, container_id = %container_id, tail);
        Some(tokio::spawn(
            async move {
                let result = tokio::select! {
                    biased;
                    () = ticket.cancel.cancelled() => {
                        debug!("log fetch cancelled");
                        return;
                    }
                    result = containers.logs(&container_id, tail) => result,
                };
                let terminal = match result {
                    Ok(text) => ServerMessage::ContainerLogs {
                        logs: tail_lines(&text, tail).to_string(),
                        container_id,
                        tail,
                        follow: false,
                    },
                    Err(e) => ServerMessage::ContainerLogsError {
                        container_id,
                        error: e.to_string(),
                    },
                };
                finish(&registry, &ticket, &terminal);
            }
            .instrument(span),
        ))
    }
}

fn finish(registry: &SessionRegistry, ticket: &TaskTicket, terminal: &ServerMessage) {
    if !registry.deliver_from_task(ticket, terminal, true) {
        debug!("result discarded, task superseded or session gone");
    }
}

/// The last `n` lines of `text`, keeping a trailing newline if present.
pub fn tail_lines(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let body = text.strip_suffix('\n').unwrap_or(text);
    let mut start = 0;
    let mut seen = 0;
    for (idx, _) in body.rmatch_indices('\n') {
        seen += 1;
        if seen == n {
            start = idx + 1;
            break;
        }
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::channel::PushChannel;
    use serde_json::Value;
    use tars_core::SessionKey;
    use tars_host::stubs::{StubContainers, stub_services};
    use tokio::sync::mpsc;

    struct Fixture {
        registry: Arc<SessionRegistry>,
        supervisor: TaskSupervisor,
        containers: Arc<StubContainers>,
        handle: SessionHandle,
        rx: mpsc::Receiver<Arc<String>>,
    }

    fn fixture(containers: StubContainers) -> Fixture {
        let registry = Arc::new(SessionRegistry::default());
        let containers = Arc::new(containers);
        let supervisor = TaskSupervisor::new(registry.clone(), stub_services(containers.clone()));
        let (chan, rx) = PushChannel::pair(32);
        let chan = Arc::new(chan);
        let handle = SessionHandle {
            key: SessionKey::from("c1"),
            connection_id: chan.id(),
        };
        registry.register(handle.key.clone(), chan).unwrap();
        Fixture {
            registry,
            supervisor,
            containers,
            handle,
            rx,
        }
    }

    fn next(rx: &mut mpsc::Receiver<Arc<String>>) -> Value {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    #[test]
    fn tail_lines_cases() {
        let text = "a\nb\nc\n";
        assert_eq!(tail_lines(text, 2), "b\nc\n");
        assert_eq!(tail_lines(text, 3), text);
        assert_eq!(tail_lines(text, 10), text);
        assert_eq!(tail_lines(text, 0), "");
        assert_eq!(tail_lines("a\nb\nc", 1), "c");
        assert_eq!(tail_lines("", 5), "");
    }

    #[tokio::test]
    async fn action_reports_progress_then_success() {
        let mut f = fixture(StubContainers::new());
        let task = f
            .supervisor
            .container_action(&f.handle, "abc".into(), ContainerAction::Restart)
            .unwrap();
        task.await.unwrap();

        let first = next(&mut f.rx);
        assert_eq!(first["type"], "container_action_result");
        assert_eq!(first["status"], "in_progress");
        assert_eq!(first["message"], "Restart requested...");
        let last = next(&mut f.rx);
        assert_eq!(last["status"], "success");
        assert_eq!(last["message"], "Container restarted successfully");
        assert!(f.rx.try_recv().is_err());
        assert!(!f.registry.task_active("c1"));
    }

    #[tokio::test]
    async fn action_failure_is_terminal_error() {
        let mut f = fixture(StubContainers::new().failing_actions("daemon down"));
        f.supervisor
            .container_action(&f.handle, "abc".into(), ContainerAction::Stop)
            .unwrap()
            .await
            .unwrap();
        assert_eq!(next(&mut f.rx)["status"], "in_progress");
        let last = next(&mut f.rx);
        assert_eq!(last["status"], "error");
        assert!(last["message"].as_str().unwrap().contains("daemon down"));
    }

    #[tokio::test]
    async fn superseded_action_delivers_nothing_terminal() {
        let mut f = fixture(StubContainers::new().gated());
        let first = f
            .supervisor
            .container_action(&f.handle, "abc".into(), ContainerAction::Restart)
            .unwrap();
        f.containers.wait_started(1).await;
        let second = f
            .supervisor
            .container_action(&f.handle, "abc".into(), ContainerAction::Stop)
            .unwrap();
        first.await.unwrap();
        f.containers.release(2);
        second.await.unwrap();

        let statuses: Vec<(String, String)> = std::iter::from_fn(|| f.rx.try_recv().ok())
            .map(|t| {
                let v: Value = serde_json::from_str(&t).unwrap();
                (v["action"].as_str().unwrap().to_string(), v["status"].as_str().unwrap().to_string())
            })
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("restart".into(), "in_progress".into()),
                ("stop".into(), "in_progress".into()),
                ("stop".into(), "success".into()),
            ]
        );
        assert_eq!(f.containers.finished(), 1);
    }

    #[tokio::test]
    async fn teardown_cancels_in_flight_logs() {
        let mut f = fixture(StubContainers::new().gated());
        let task = f
            .supervisor
            .container_logs(&f.handle, "abc".into(), 5, false)
            .unwrap();
        f.containers.wait_started(1).await;
        f.registry.unregister("c1");
        task.await.unwrap();
        assert!(f.rx.try_recv().is_err());
        assert_eq!(f.containers.finished(), 0);
    }

    #[tokio::test]
    async fn logs_are_truncated_and_never_follow() {
        let mut f = fixture(StubContainers::new());
        f.supervisor
            .container_logs(&f.handle, "abc".into(), 3, true)
            .unwrap()
            .await
            .unwrap();
        let msg = next(&mut f.rx);
        assert_eq!(msg["type"], "container_logs");
        assert_eq!(msg["logs"], "line 8\nline 9\nline 10\n");
        assert_eq!(msg["tail"], 3);
        assert_eq!(msg["follow"], false);
    }

    #[tokio::test]
    async fn logs_failure_reports_error() {
        let mut f = fixture(StubContainers::new());
        f.supervisor
            .container_logs(&f.handle, "zzz".into(), 10, false)
            .unwrap()
            .await
            .unwrap();
        let msg = next(&mut f.rx);
        assert_eq!(msg["type"], "container_logs_error");
        assert_eq!(msg["container_id"], "zzz");
        assert_eq!(msg["error"], "No such container: zzz");
    }

    #[tokio::test]
    async fn backed_up_client_is_dropped_not_left_waiting() {
        let registry = Arc::new(SessionRegistry::default());
        let supervisor = TaskSupervisor::new(registry.clone(), stub_services(Arc::new(StubContainers::new())));
        let (chan, mut rx) = PushChannel::pair(1);
        let chan = Arc::new(chan);
        let handle = SessionHandle {
            key: SessionKey::from("c1"),
            connection_id: chan.id(),
        };
        registry.register(handle.key.clone(), chan.clone()).unwrap();
        assert!(registry.reply(&handle, &ServerMessage::error("earlier")));

        supervisor
            .container_action(&handle, "abc".into(), ContainerAction::Restart)
            .unwrap()
            .await
            .unwrap();

        assert!(!registry.contains("c1"));
        assert!(chan.is_closed());
        assert_eq!(next(&mut rx)["message"], "earlier");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_handle_starts_nothing() {
        let f = fixture(StubContainers::new());
        f.registry.unregister("c1");
        assert!(
            f.supervisor
                .container_action(&f.handle, "abc".into(), ContainerAction::Start)
                .is_none()
        );
    }
}
