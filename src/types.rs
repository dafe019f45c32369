//! Core types and events

use crate::error::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use url::Url;

/// Where to log in
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Environment {
    /// Production orgs (login.salesforce.com)
    #[default]
    Production,
    /// Sandbox orgs (test.salesforce.com)
    Sandbox,
    /// A My Domain host, e.g. "mycompany.my" or "mycompany.my.salesforce.com"
    Custom(String),
    /// An explicit login base URL
    Url(Url),
}

impl Environment {
    /// Base URL the SOAP login is posted to
    pub fn login_base_url(&self) -> Result<Url> {
        let raw = match self {
            Environment::Production => "https://login.salesforce.com".to_string(),
            Environment::Sandbox => "https://test.salesforce.com".to_string(),
            Environment::Custom(domain) => {
                let domain = domain
                    .trim()
                    .trim_start_matches("https://")
                    .trim_end_matches('/');
                if domain.is_empty() {
                    return Err(Error::Config {
                        message: "custom domain is empty".to_string(),
                        key: Some("environment".to_string()),
                    });
                }
                if domain.ends_with(".salesforce.com") {
                    format!("https://{}", domain)
                } else {
                    format!("https://{}.salesforce.com", domain)
                }
            }
            Environment::Url(url) => return Ok(url.clone()),
        };

        Url::parse(&raw).map_err(|e| Error::Config {
            message: format!("invalid login URL '{}': {}", raw, e),
            key: Some("environment".to_string()),
        })
    }
}

/// Login credentials
///
/// Held only for the duration of one negotiation. Secrets are overwritten
/// when the value is dropped, and `Debug` never prints them.
pub struct Credentials {
    username: String,
    password: String,
    security_token: Option<String>,
    environment: Environment,
}

impl Credentials {
    /// Credentials for a production org without a security token
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            security_token: None,
            environment: Environment::Production,
        }
    }

    /// Attach the security token appended to the password.
    ///
    /// An empty token is treated as absent (trusted IP range).
    pub fn with_security_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.security_token = if token.is_empty() { None } else { Some(token) };
        self
    }

    /// Select the login environment
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Login username
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Login environment
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Whether a security token was supplied
    pub fn has_security_token(&self) -> bool {
        self.security_token.is_some()
    }

    /// Password with the security token appended when present
    pub(crate) fn composed_secret(&self) -> String {
        let mut secret = String::with_capacity(
            self.password.len() + self.security_token.as_ref().map_or(0, String::len),
        );
        secret.push_str(&self.password);
        if let Some(token) = &self.security_token {
            secret.push_str(token);
        }
        secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field(
                "security_token",
                &self.security_token.as_ref().map(|_| "<redacted>"),
            )
            .field("environment", &self.environment)
            .finish()
    }
}

impl Drop for Credentials {
    fn drop(&mut self) {
        wipe(&mut self.password);
        if let Some(token) = self.security_token.as_mut() {
            wipe(token);
        }
    }
}

/// Overwrite a secret's bytes before releasing its allocation
pub(crate) fn wipe(secret: &mut String) {
    let mut bytes = std::mem::take(secret).into_bytes();
    bytes.iter_mut().for_each(|b| *b = 0);
    std::hint::black_box(&bytes);
}

/// REST API version, e.g. 58.0
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApiVersion {
    major: u32,
    minor: u32,
}

impl ApiVersion {
    /// Version used for the login handshake and when discovery fails
    pub const FALLBACK: ApiVersion = ApiVersion::new(58, 0);

    /// Build a version from its components
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Path segment used in REST URLs ("v58.0")
    pub fn path_segment(&self) -> String {
        format!("v{}", self)
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ApiVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        let (major, minor) = digits.split_once('.').unwrap_or((digits, "0"));
        let parse = |part: &str| {
            part.parse::<u32>()
                .map_err(|_| Error::Protocol(format!("invalid API version '{}'", s)))
        };
        Ok(Self::new(parse(major)?, parse(minor)?))
    }
}

impl TryFrom<String> for ApiVersion {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ApiVersion> for String {
    fn from(value: ApiVersion) -> Self {
        value.to_string()
    }
}

/// Identity of the logged-in user
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// User record id
    pub user_id: String,
    /// Organization id
    pub org_id: String,
    /// Full display name
    pub display_name: String,
}

/// Authenticated context for every post-login call
///
/// Immutable once created. Nothing renews it: when the remote side expires
/// the session, calls fail and the failure is surfaced.
#[derive(Clone)]
pub struct SessionHandle {
    token: String,
    instance_url: Url,
    api_version: ApiVersion,
    user: UserIdentity,
}

impl SessionHandle {
    /// Assemble a session from its parts
    pub fn new(
        token: impl Into<String>,
        instance_url: Url,
        api_version: ApiVersion,
        user: UserIdentity,
    ) -> Self {
        Self {
            token: token.into(),
            instance_url,
            api_version,
            user,
        }
    }

    /// Session id, used as bearer token and as the `sid` cookie
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Instance base URL, e.g. https://na1.salesforce.com
    pub fn instance_url(&self) -> &Url {
        &self.instance_url
    }

    /// Negotiated REST API version
    pub fn api_version(&self) -> ApiVersion {
        self.api_version
    }

    /// Logged-in user
    pub fn user(&self) -> &UserIdentity {
        &self.user
    }

    /// Instance URL as a string without a trailing slash
    pub(crate) fn base(&self) -> &str {
        self.instance_url.as_str().trim_end_matches('/')
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("token", &"<redacted>")
            .field("instance_url", &self.instance_url.as_str())
            .field("api_version", &self.api_version)
            .field("user", &self.user)
            .finish()
    }
}

/// Declared report format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    /// Flat rows
    #[default]
    Tabular,
    /// Grouped rows
    Summary,
    /// Grouped rows and columns
    Matrix,
    /// Multi-block report; the export endpoint rejects these
    Joined,
    /// Anything the listing reports that is not one of the above
    Other,
}

impl ReportFormat {
    /// Map the API's `reportFormat` value
    pub fn from_api(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "TABULAR" => ReportFormat::Tabular,
            "SUMMARY" => ReportFormat::Summary,
            "MATRIX" => ReportFormat::Matrix,
            "MULTI_BLOCK" | "JOINED" => ReportFormat::Joined,
            _ => ReportFormat::Other,
        }
    }

    /// Display name
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFormat::Tabular => "TABULAR",
            ReportFormat::Summary => "SUMMARY",
            ReportFormat::Matrix => "MATRIX",
            ReportFormat::Joined => "JOINED",
            ReportFormat::Other => "OTHER",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One exportable report as listed by the remote system
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDescriptor {
    /// Report id
    pub id: String,
    /// Report display name
    pub name: String,
    /// Declared format
    pub format: ReportFormat,
}

impl ReportDescriptor {
    /// Build a descriptor
    pub fn new(id: impl Into<String>, name: impl Into<String>, format: ReportFormat) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            format,
        }
    }
}

/// A report that could not be exported
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Report id
    pub report_id: String,
    /// Report display name
    pub report_name: String,
    /// Declared format
    pub format: ReportFormat,
    /// Failure classification
    pub kind: ErrorKind,
    /// Human-readable reason
    pub message: String,
    /// Network attempts made (0 when rejected before any request)
    pub attempts: u32,
}

/// Result of exporting one report
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetrievalOutcome {
    /// Raw tabular bytes
    Success {
        /// Report content as delivered
        data: Vec<u8>,
        /// Length of `data` in bytes
        byte_len: usize,
    },
    /// Terminal failure for this report
    Failure(FailureRecord),
}

impl RetrievalOutcome {
    /// Wrap downloaded bytes
    pub fn success(data: Vec<u8>) -> Self {
        let byte_len = data.len();
        RetrievalOutcome::Success { data, byte_len }
    }

    /// Build a failure for `report`
    pub fn failure(
        report: &ReportDescriptor,
        kind: ErrorKind,
        message: impl Into<String>,
        attempts: u32,
    ) -> Self {
        RetrievalOutcome::Failure(FailureRecord {
            report_id: report.id.clone(),
            report_name: report.name.clone(),
            format: report.format,
            kind,
            message: message.into(),
            attempts,
        })
    }

    /// Whether this is a success
    pub fn is_success(&self) -> bool {
        matches!(self, RetrievalOutcome::Success { .. })
    }

    /// The failure record, if any
    pub fn as_failure(&self) -> Option<&FailureRecord> {
        match self {
            RetrievalOutcome::Failure(record) => Some(record),
            RetrievalOutcome::Success { .. } => None,
        }
    }
}

/// Aggregate result of one export run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    /// Reports returned by the listing
    pub total: usize,
    /// Reports for which an outcome was produced
    pub attempted: usize,
    /// Reports written to the archive
    pub succeeded: usize,
    /// Failed reports, in the order they were encountered
    pub failures: Vec<FailureRecord>,
    /// Data entry names, in archive order (summary entry excluded)
    pub entries: Vec<String>,
    /// Uncompressed bytes written to data entries
    pub bytes_written: u64,
    /// Run was stopped before every report was attempted
    pub cancelled: bool,
    /// Final archive location
    pub archive_path: PathBuf,
}

impl ExportSummary {
    /// Number of failed reports
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Event emitted during an export run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// One more report has an outcome
    Progress {
        /// Reports with an outcome so far
        done: usize,
        /// Reports listed
        total: usize,
    },

    /// Human-readable log line
    Log {
        /// Message text
        message: String,
    },

    /// Run finished and the archive is complete
    Completed {
        /// Final summary
        summary: ExportSummary,
    },

    /// Run aborted
    Failed {
        /// Error classification
        kind: ErrorKind,
        /// Error message
        error: String,
    },
}
