//! Process-wide stop signal for the listener, session loops and publisher.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Drain budget used when the caller does not supply one.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// How a drain ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks that returned (or panicked) within the budget.
    pub completed: usize,
    /// Tasks still running at the deadline, aborted.
    pub aborted: usize,
}

/// Owns the token every long-running server task watches.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Fresh, not-yet-cancelled coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for a task that must stop on shutdown.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal every holder of [`token`](Self::token). Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal shutdown, then give `handles` until `timeout` (30s by default)
    /// to finish. Anything still running at the deadline is aborted.
    pub async fn graceful_shutdown(
        &self,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) -> ShutdownReport {
        let budget = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();
        info!(tasks = handles.len(), budget_secs = budget.as_secs(), "draining server tasks");

        let deadline = tokio::time::Instant::now() + budget;
        let mut report = ShutdownReport::default();
        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_ok() {
                report.completed += 1;
            } else {
                handle.abort();
                report.aborted += 1;
            }
        }

        if report.aborted > 0 {
            warn!(aborted = report.aborted, "tasks did not stop within {budget:?}; aborted");
        }
        report
    }
}
