//! Error types for sf-report-export
//!
//! Two layers of failure exist in an export run:
//! - [`Error`] is a run-level failure. It aborts the run (negotiation, listing,
//!   or archive writing went wrong).
//! - [`ErrorKind`] classifies a per-report failure. Those never abort the run;
//!   they are recorded in the [`ExportSummary`](crate::types::ExportSummary).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for sf-report-export operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sf-report-export
#[derive(Debug, Error)]
pub enum Error {
    /// Credentials were rejected, or the session is no longer accepted
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Transport failure (DNS, connect, TLS, reset)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A call exceeded its per-class timeout
    #[error("request timed out after {seconds}s: {operation}")]
    Timeout {
        /// The operation that timed out (e.g., "login", "list reports")
        operation: String,
        /// The configured timeout in seconds
        seconds: u64,
    },

    /// The remote system kept answering 429/5xx until retries ran out
    #[error("service unavailable (HTTP {status}): {message}")]
    Unavailable {
        /// Last HTTP status received
        status: u16,
        /// Description of the last failure
        message: String,
    },

    /// The remote system answered with something this client cannot interpret
    #[error("unexpected response: {0}")]
    Protocol(String),

    /// Archive destination could not be written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// ZIP encoder failure
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "retry.max_attempts")
        key: Option<String>,
    },

    /// JSON decoding error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build a timeout error for the given operation
    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            seconds: timeout.as_secs(),
        }
    }

    /// Map a failed `send()`/body read, turning client timeouts into [`Error::Timeout`]
    pub(crate) fn from_request(
        e: reqwest::Error,
        operation: &str,
        timeout: std::time::Duration,
    ) -> Self {
        if e.is_timeout() {
            Error::timeout(operation, timeout)
        } else {
            Error::Network(e)
        }
    }

    /// Classification of this error, shared with per-report failure records
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Auth(_) => ErrorKind::Auth,
            Error::Network(_) | Error::Timeout { .. } | Error::Unavailable { .. } => {
                ErrorKind::Network
            }
            Error::Protocol(_) | Error::Serialization(_) => ErrorKind::Protocol,
            Error::Io(_) | Error::Archive(_) => ErrorKind::Io,
            Error::Config { .. } => ErrorKind::Config,
        }
    }
}

/// Failure classification
///
/// Used both as [`Error::kind`] and as the tag of a per-report
/// [`FailureRecord`](crate::types::FailureRecord).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad credentials or rejected session
    Auth,
    /// Connection failure or timeout
    Network,
    /// HTTP 429
    RateLimited,
    /// HTTP 5xx
    ServerFault,
    /// HTTP 401/403 or an "access denied" page for a single report
    Permission,
    /// HTTP 404 or 410
    NotFound,
    /// Report format the export endpoint rejects unconditionally (joined reports)
    UnsupportedType,
    /// Export endpoint redirected to a login page
    SessionExpired,
    /// 2xx response whose body is not tabular data
    InvalidContent,
    /// Unexpected response shape or status
    Protocol,
    /// Archive write failure
    Io,
    /// Invalid configuration
    Config,
}

impl ErrorKind {
    /// Stable name used in summaries and events
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Auth => "AuthError",
            ErrorKind::Network => "NetworkError",
            ErrorKind::RateLimited => "RateLimitedError",
            ErrorKind::ServerFault => "ServerError",
            ErrorKind::Permission => "PermissionError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::UnsupportedType => "UnsupportedTypeError",
            ErrorKind::SessionExpired => "SessionExpiredError",
            ErrorKind::InvalidContent => "InvalidContentError",
            ErrorKind::Protocol => "ProtocolError",
            ErrorKind::Io => "IOError",
            ErrorKind::Config => "ConfigError",
        }
    }

    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::RateLimited | ErrorKind::ServerFault
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(Error::Auth("bad".into()).kind(), ErrorKind::Auth);
        assert_eq!(
            Error::timeout("login", Duration::from_secs(30)).kind(),
            ErrorKind::Network
        );
        assert_eq!(Error::Protocol("x".into()).kind(), ErrorKind::Protocol);
        assert_eq!(
            Error::Io(std::io::Error::other("disk full")).kind(),
            ErrorKind::Io
        );
    }

    #[test]
    fn test_timeout_display() {
        let err = Error::timeout("list reports", Duration::from_secs(60));
        assert_eq!(err.to_string(), "request timed out after 60s: list reports");
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::Network.is_retryable());
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::ServerFault.is_retryable());
        assert!(!ErrorKind::Permission.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::UnsupportedType.is_retryable());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::UnsupportedType).unwrap();
        assert_eq!(json, "\"unsupported_type\"");
        assert_eq!(ErrorKind::UnsupportedType.to_string(), "UnsupportedTypeError");
    }
}
