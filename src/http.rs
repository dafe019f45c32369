//! Shared HTTP plumbing: client construction and per-attempt failure classification

use crate::config::HttpConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::retry::IsRetryable;
use crate::utils::parse_retry_after;
use reqwest::StatusCode;
use std::fmt;
use std::time::Duration;

/// Build the HTTP client shared by every component of a run
///
/// Per-request timeouts are set by each call site; the client only carries
/// the connect timeout and User-Agent. Redirects are followed (the export
/// endpoint may bounce through a frontdoor URL).
pub fn build_client(config: &HttpConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| Error::Config {
            message: format!("failed to create HTTP client: {}", e),
            key: Some("http".to_string()),
        })
}

/// Map a non-success status to a failure kind; `None` for 2xx
pub fn classify_status(status: StatusCode) -> Option<ErrorKind> {
    if status.is_success() {
        return None;
    }
    Some(match status.as_u16() {
        429 => ErrorKind::RateLimited,
        500..=599 => ErrorKind::ServerFault,
        401 | 403 => ErrorKind::Permission,
        404 | 410 => ErrorKind::NotFound,
        _ => ErrorKind::Protocol,
    })
}

/// One failed HTTP attempt, classified for the retry loop
#[derive(Debug)]
pub struct AttemptError {
    /// Classification
    pub kind: ErrorKind,
    /// Human-readable reason
    pub message: String,
    /// HTTP status, when a response was received
    pub status: Option<u16>,
    /// Server-provided wait directive
    pub retry_after: Option<Duration>,
    source: Option<Error>,
}

impl AttemptError {
    /// A failure that has no HTTP response behind it
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            retry_after: None,
            source: None,
        }
    }

    /// Classify a non-success response
    pub fn from_response(response: &reqwest::Response) -> Self {
        let status = response.status();
        let kind = classify_status(status).unwrap_or(ErrorKind::Protocol);
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, chrono::Utc::now()));

        Self {
            kind,
            message: format!(
                "HTTP {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )
            .trim_end()
            .to_string(),
            status: Some(status.as_u16()),
            retry_after,
            source: None,
        }
    }

    /// Classify a transport failure (connect, reset, timeout)
    pub fn from_transport(e: reqwest::Error, operation: &str, timeout: Duration) -> Self {
        let error = Error::from_request(e, operation, timeout);
        Self {
            kind: ErrorKind::Network,
            message: error.to_string(),
            status: None,
            retry_after: None,
            source: Some(error),
        }
    }

    /// Convert into a run-level error once retries are over
    pub fn into_error(self) -> Error {
        if let Some(source) = self.source {
            return source;
        }
        match self.kind {
            ErrorKind::Auth | ErrorKind::Permission | ErrorKind::SessionExpired => {
                Error::Auth(format!("session rejected: {}", self.message))
            }
            ErrorKind::Network | ErrorKind::RateLimited | ErrorKind::ServerFault => {
                Error::Unavailable {
                    status: self.status.unwrap_or(0),
                    message: self.message,
                }
            }
            ErrorKind::Io => Error::Io(std::io::Error::other(self.message)),
            ErrorKind::Config => Error::Config {
                message: self.message,
                key: None,
            },
            ErrorKind::NotFound
            | ErrorKind::UnsupportedType
            | ErrorKind::InvalidContent
            | ErrorKind::Protocol => Error::Protocol(self.message),
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl IsRetryable for AttemptError {
    fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::OK), None);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            Some(ErrorKind::RateLimited)
        );
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            Some(ErrorKind::ServerFault)
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN),
            Some(ErrorKind::Permission)
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            Some(ErrorKind::NotFound)
        );
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST),
            Some(ErrorKind::Protocol)
        );
    }

    #[test]
    fn test_attempt_error_conversion() {
        let denied = AttemptError::new(ErrorKind::Permission, "HTTP 401 Unauthorized");
        assert!(!denied.is_retryable());
        assert!(matches!(denied.into_error(), Error::Auth(_)));

        let busy = AttemptError::new(ErrorKind::ServerFault, "HTTP 503");
        assert!(busy.is_retryable());
        assert!(matches!(busy.into_error(), Error::Unavailable { .. }));

        let missing = AttemptError::new(ErrorKind::NotFound, "HTTP 404");
        assert!(matches!(missing.into_error(), Error::Protocol(_)));
    }

    #[test]
    fn test_build_client() {
        assert!(build_client(&HttpConfig::default()).is_ok());
    }
}
