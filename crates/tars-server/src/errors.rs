//! Server error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tars_host::HostError;
use thiserror::Error;

/// Session registry failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The key is already held by a live session and the policy is `reject`.
    #[error("session '{0}' is already connected")]
    DuplicateSession(String),
}

/// Fatal server failures.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The bound listener has no local address.
    #[error("failed to read local address: {0}")]
    LocalAddr(std::io::Error),
}

impl ServerError {
    /// Wrap a bind failure.
    pub fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }
}

/// REST error response: `{"status": "error", "message": …}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Error with an explicit status.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// 400 Bad Request.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Map a collaborator error, prefixing the message with `context`.
    pub fn from_host(context: &str, err: &HostError) -> Self {
        let status = match err {
            HostError::NotFound(_) => StatusCode::NOT_FOUND,
            HostError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            HostError::InvalidAction(_) => StatusCode::BAD_REQUEST,
            HostError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, format!("{context}: {err}"))
    }

    /// HTTP status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "status": "error", "message": self.message }));
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_session_display() {
        let err = RegistryError::DuplicateSession("c1".into());
        assert_eq!(err.to_string(), "session 'c1' is already connected");
    }

    #[test]
    fn host_errors_map_to_status() {
        let not_found = ApiError::from_host(
            "Failed to kill process",
            &HostError::NotFound("Process not found".into()),
        );
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        assert_eq!(not_found.message(), "Failed to kill process: Process not found");

        let denied = ApiError::from_host("x", &HostError::PermissionDenied("no".into()));
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let other = ApiError::from_host("x", &HostError::Other("boom".into()));
        assert_eq!(other.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn response_body_shape() {
        let resp = ApiError::bad_request("Invalid power action").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "error");
        assert_eq!(parsed["message"], "Invalid power action");
    }
}
