//! Error types for capability dispatch.

use thiserror::Error;

/// Every failure the dispatch core can raise.
///
/// Variants are constructed where the failure happens and travel up through
/// the [`Dispatcher`](crate::dispatcher::Dispatcher) unchanged. A remote
/// tool reporting `isError` is *not* an error here; it arrives as data on
/// [`NormalizedResult`](crate::mcp::types::NormalizedResult).
#[derive(Error, Debug)]
pub enum DispatchError {
    /// No transport is mapped to the capability identifier.
    #[error("unsupported capability: {0}")]
    UnsupportedCapability(String),

    /// Subprocess spawn or protocol handshake failed (including its deadline).
    #[error("connection failed: {reason}")]
    ConnectionFailed {
        /// What went wrong while connecting.
        reason: String,
    },

    /// A session operation was attempted outside the `Connected` state.
    #[error("session is not connected")]
    NotConnected,

    /// A deadline elapsed before the operation produced a result.
    #[error("{label} timed out after {limit_ms}ms")]
    Timeout {
        /// Which operation was being awaited.
        label: String,
        /// The deadline that was exceeded.
        limit_ms: u64,
    },

    /// The endpoint answered with a non-success status.
    #[error("HTTP {status_code}: {status_text}")]
    Http {
        /// HTTP status code.
        status_code: u16,
        /// Reason phrase, extended with the vendor message when one is present.
        status_text: String,
    },

    /// An event-stream response carried no `data:` line.
    #[error("event stream contained no data event")]
    MalformedStream,

    /// The request never produced a status (DNS, TLS, refused connection, ...).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The protocol server answered with a JSON-RPC error object.
    #[error("remote error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },

    /// A response was structurally unusable.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl DispatchError {
    pub(crate) fn connection(reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            reason: reason.into(),
        }
    }

    /// Whether this failure class may succeed on a later attempt.
    ///
    /// Advisory only: [`RetryPolicy::run`](crate::retry::RetryPolicy::run)
    /// retries blindly; pass this to
    /// [`RetryPolicy::run_if`](crate::retry::RetryPolicy::run_if) for
    /// selective retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::Timeout { .. } | Self::Network(_) => true,
            Self::Http { status_code, .. } => *status_code == 429 || *status_code >= 500,
            Self::UnsupportedCapability(_)
            | Self::NotConnected
            | Self::MalformedStream
            | Self::Rpc { .. }
            | Self::Protocol(_) => false,
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::UnsupportedCapability(_) => 2,
            Self::Http {
                status_code: 401 | 403,
                ..
            } => 3,
            Self::Http { .. } => 4,
            Self::Timeout { .. } => 5,
            Self::ConnectionFailed { .. } | Self::Network(_) => 6,
            Self::MalformedStream | Self::Rpc { .. } | Self::Protocol(_) => 7,
            Self::NotConnected => 1,
        }
    }
}

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status_code: u16) -> DispatchError {
        DispatchError::Http {
            status_code,
            status_text: String::new(),
        }
    }

    #[test]
    fn test_http_retry_classification() {
        assert!(http(500).is_retryable());
        assert!(http(503).is_retryable());
        assert!(http(429).is_retryable());
        assert!(!http(401).is_retryable());
        assert!(!http(400).is_retryable());
    }

    #[test]
    fn test_fatal_kinds_are_not_retryable() {
        assert!(!DispatchError::UnsupportedCapability("x".into()).is_retryable());
        assert!(!DispatchError::NotConnected.is_retryable());
        assert!(!DispatchError::MalformedStream.is_retryable());
        assert!(DispatchError::connection("spawn failed").is_retryable());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(http(401).exit_code(), 3);
        assert_eq!(http(403).exit_code(), 3);
        assert_eq!(http(502).exit_code(), 4);
        assert_eq!(
            DispatchError::Timeout {
                label: "call".into(),
                limit_ms: 10
            }
            .exit_code(),
            5
        );
        assert_eq!(DispatchError::UnsupportedCapability("x".into()).exit_code(), 2);
    }

    #[test]
    fn test_timeout_message_carries_label_and_limit() {
        let err = DispatchError::Timeout {
            label: "tools/call image_analysis".into(),
            limit_ms: 120_000,
        };
        assert_eq!(
            err.to_string(),
            "tools/call image_analysis timed out after 120000ms"
        );
    }
}
