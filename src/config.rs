//! Configuration types for sf-report-export

use crate::error::{Error, Result};
use crate::types::ApiVersion;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration
///
/// Every field has a default, so `Config::default()` is a working setup and a
/// partial JSON document only needs to name what it overrides.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP client settings and per-call-class timeouts
    #[serde(default)]
    pub http: HttpConfig,

    /// Retry policy for listing and export calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Export pacing and archive layout
    #[serde(default)]
    pub export: ExportConfig,

    /// Protocol versions used before negotiation completes
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

impl Config {
    /// Parse a configuration from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make an export run meaningless
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(config_error(
                "max_attempts must be at least 1",
                "retry.max_attempts",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(config_error(
                "backoff_multiplier must be >= 1.0",
                "retry.backoff_multiplier",
            ));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(config_error(
                "initial_delay must not exceed max_delay",
                "retry.initial_delay",
            ));
        }
        if self.export.max_filename_len == 0 {
            return Err(config_error(
                "max_filename_len must be at least 1",
                "export.max_filename_len",
            ));
        }
        if self.export.summary_entry_name.trim().is_empty() {
            return Err(config_error(
                "summary_entry_name must not be empty",
                "export.summary_entry_name",
            ));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

/// HTTP client configuration
///
/// Timeouts are split by call class: the login, discovery and listing calls
/// are small and get short timeouts, report exports have unbounded payloads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// TCP connect timeout (default: 10 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// SOAP login timeout (default: 30 seconds)
    #[serde(default = "default_login_timeout", with = "duration_serde")]
    pub login_timeout: Duration,

    /// Capability discovery timeout (default: 15 seconds)
    #[serde(default = "default_discovery_timeout", with = "duration_serde")]
    pub discovery_timeout: Duration,

    /// Report listing timeout (default: 60 seconds)
    #[serde(default = "default_listing_timeout", with = "duration_serde")]
    pub listing_timeout: Duration,

    /// Single report export timeout (default: 120 seconds)
    #[serde(default = "default_export_timeout", with = "duration_serde")]
    pub export_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout: default_connect_timeout(),
            login_timeout: default_login_timeout(),
            discovery_timeout: default_discovery_timeout(),
            listing_timeout: default_listing_timeout(),
            export_timeout: default_export_timeout(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, first try included (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failed attempt (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_millis_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between attempts (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_millis_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Export pacing and archive layout
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Minimum spacing between consecutive report exports (default: 500 ms)
    #[serde(default = "default_inter_request_delay", with = "duration_millis_serde")]
    pub inter_request_delay: Duration,

    /// Maximum length of a sanitized archive entry stem, in characters (default: 100)
    #[serde(default = "default_max_filename_len")]
    pub max_filename_len: usize,

    /// Name of the synthetic summary entry (default: "_EXPORT_SUMMARY.txt")
    #[serde(default = "default_summary_entry_name")]
    pub summary_entry_name: String,

    /// Client identifier sent in the SOAP `CallOptions` header
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            inter_request_delay: default_inter_request_delay(),
            max_filename_len: default_max_filename_len(),
            summary_entry_name: default_summary_entry_name(),
            client_name: default_client_name(),
        }
    }
}

/// Protocol version settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Version used for the SOAP handshake, and the fallback when
    /// capability discovery fails (default: 58.0)
    #[serde(default = "default_login_api_version")]
    pub login_api_version: ApiVersion,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            login_api_version: default_login_api_version(),
        }
    }
}

fn default_user_agent() -> String {
    format!("sf-report-export/{}", env!("CARGO_PKG_VERSION"))
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_login_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_discovery_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_listing_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_export_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_inter_request_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_filename_len() -> usize {
    100
}

fn default_summary_entry_name() -> String {
    "_EXPORT_SUMMARY.txt".to_string()
}

fn default_client_name() -> String {
    "SalesforceReportExporter".to_string()
}

fn default_login_api_version() -> ApiVersion {
    ApiVersion::FALLBACK
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Sub-second delays need millisecond precision
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
