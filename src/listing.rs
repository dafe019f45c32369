//! Report discovery.
//!
//! One authenticated GET against the analytics listing endpoint of the
//! negotiated API version. Access control is the remote system's job: every
//! record it returns becomes a [`ReportDescriptor`], in the order returned,
//! with no filtering or de-duplication.

use crate::config::Config;
use crate::error::{ErrorKind, Result};
use crate::http::AttemptError;
use crate::retry::retry_with_backoff;
use crate::types::{ReportDescriptor, ReportFormat, SessionHandle};
use serde_json::Value;
use tracing::{debug, info};

/// Enumerates the reports a session may export
pub struct ReportLister {
    http_client: reqwest::Client,
    config: Config,
}

impl ReportLister {
    /// Create a lister sharing `http_client`
    pub fn new(http_client: reqwest::Client, config: Config) -> Self {
        Self {
            http_client,
            config,
        }
    }

    /// Listing endpoint for a session
    pub fn listing_url(session: &SessionHandle) -> String {
        format!(
            "{}/services/data/{}/analytics/reports",
            session.base(),
            session.api_version().path_segment()
        )
    }

    /// Fetch every report visible to the session
    ///
    /// Transient failures (429, 5xx, timeouts) are retried with the
    /// configured backoff.
    ///
    /// # Errors
    ///
    /// - [`Error::Auth`](crate::Error::Auth) when the session is rejected (401/403)
    /// - [`Error::Network`](crate::Error::Network), [`Error::Timeout`](crate::Error::Timeout)
    ///   or [`Error::Unavailable`](crate::Error::Unavailable) once retries are exhausted
    /// - [`Error::Protocol`](crate::Error::Protocol) for an unexpected status or body
    pub async fn list_reports(&self, session: &SessionHandle) -> Result<Vec<ReportDescriptor>> {
        let url = Self::listing_url(session);
        debug!(%url, "Listing reports");

        let reports = retry_with_backoff(&self.config.retry, || self.fetch(session, &url))
            .await
            .map_err(AttemptError::into_error)?;

        info!(count = reports.len(), "Listed reports");
        Ok(reports)
    }

    async fn fetch(
        &self,
        session: &SessionHandle,
        url: &str,
    ) -> std::result::Result<Vec<ReportDescriptor>, AttemptError> {
        let timeout = self.config.http.listing_timeout;
        let response = self
            .http_client
            .get(url)
            .bearer_auth(session.token())
            .header("Accept", "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| AttemptError::from_transport(e, "list reports", timeout))?;

        if !response.status().is_success() {
            return Err(AttemptError::from_response(&response));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| {
                if e.is_decode() {
                    AttemptError::new(
                        ErrorKind::Protocol,
                        format!("invalid report listing: {}", e),
                    )
                } else {
                    AttemptError::from_transport(e, "list reports", timeout)
                }
            })?;

        parse_report_listing(&body)
    }
}

/// Turn a listing body into descriptors
///
/// Accepts a bare array, or an object holding the array under `reports` or
/// `records`.
pub(crate) fn parse_report_listing(
    body: &Value,
) -> std::result::Result<Vec<ReportDescriptor>, AttemptError> {
    let records = match body {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("reports").or_else(|| map.get("records")) {
            Some(Value::Array(items)) => items.as_slice(),
            Some(_) => return Err(shape_error("'reports' is not an array")),
            None => &[][..],
        },
        _ => return Err(shape_error("listing is neither an array nor an object")),
    };

    records
        .iter()
        .enumerate()
        .map(|(index, record)| parse_record(index, record))
        .collect()
}

fn parse_record(index: usize, record: &Value) -> std::result::Result<ReportDescriptor, AttemptError> {
    let id = record
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| shape_error(&format!("record {} has no id", index)))?;

    let name = record
        .get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .unwrap_or(id);

    let format = record
        .get("reportFormat")
        .or_else(|| record.get("format"))
        .and_then(Value::as_str)
        .map(ReportFormat::from_api)
        .unwrap_or_default();

    Ok(ReportDescriptor::new(id, name, format))
}

fn shape_error(detail: &str) -> AttemptError {
    AttemptError::new(
        ErrorKind::Protocol,
        format!("unexpected report listing: {}", detail),
    )
}
