//! Host collaborator error types.

use thiserror::Error;

/// Errors surfaced by host collaborators.
#[derive(Debug, Error)]
pub enum HostError {
    /// The target process or container does not exist.
    #[error("{0}")]
    NotFound(String),
    /// The OS refused the operation.
    #[error("{0}")]
    PermissionDenied(String),
    /// An external command ran but reported failure.
    #[error("{command} failed: {stderr}")]
    CommandFailed {
        /// Command line that failed.
        command: String,
        /// Trimmed stderr (or stdout when stderr was empty).
        stderr: String,
    },
    /// An external command did not finish in time.
    #[error("{command} timed out after {secs}s")]
    Timeout {
        /// Command line that timed out.
        command: String,
        /// Timeout that elapsed.
        secs: u64,
    },
    /// A required tool or facility is missing on this host.
    #[error("{0} not available")]
    Unavailable(String),
    /// An unsupported action name.
    #[error("invalid action: {0}")]
    InvalidAction(String),
    /// Output from a tool could not be interpreted.
    #[error("failed to parse {what}: {detail}")]
    Parse {
        /// What was being parsed.
        what: &'static str,
        /// Parser detail.
        detail: String,
    },
    /// Low-level I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl HostError {
    /// Short machine-readable category, used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::PermissionDenied(_) => "permission_denied",
            Self::CommandFailed { .. } => "command_failed",
            Self::Timeout { .. } => "timeout",
            Self::Unavailable(_) => "unavailable",
            Self::InvalidAction(_) => "invalid_action",
            Self::Parse { .. } => "parse",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}

/// Result type for host operations.
pub type Result<T> = std::result::Result<T, HostError>;
