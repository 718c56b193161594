//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why a settings file could not be turned into [`TarsSettings`](crate::TarsSettings).
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The file is not valid JSON, or a value has the wrong shape.
    #[error("malformed settings in {}: {source}", path.display())]
    Malformed {
        /// File the JSON came from.
        path: PathBuf,
        /// Parser detail, including line and column.
        source: serde_json::Error,
    },
    /// A value parsed but breaks a constraint.
    #[error("{field}: {reason}")]
    Invalid {
        /// Dotted camelCase key, e.g. `server.outboundBuffer`.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl SettingsError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_error_names_the_file() {
        let err = SettingsError::Read {
            path: PathBuf::from("/etc/tars/settings.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "cannot read /etc/tars/settings.json: denied");
    }

    #[test]
    fn malformed_error_carries_position() {
        let source = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err = SettingsError::Malformed {
            path: PathBuf::from("s.json"),
            source,
        };
        let text = err.to_string();
        assert!(text.starts_with("malformed settings in s.json: "));
        assert!(text.contains("line 1"));
    }

    #[test]
    fn invalid_names_the_field() {
        let err = SettingsError::invalid("server.outboundBuffer", "must be positive");
        assert_eq!(err.to_string(), "server.outboundBuffer: must be positive");
    }
}
