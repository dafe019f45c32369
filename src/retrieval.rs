//! Report retrieval.
//!
//! [`ReportFetcher::retrieve`] is the failure-isolation boundary of an export
//! run: whatever goes wrong with one report ends up in a
//! [`RetrievalOutcome::Failure`], never in an `Err`.
//!
//! Reports are downloaded through the UI export path
//! (`/{id}?isdtp=p1&export=1&enc=UTF-8&xf=csv`) rather than the analytics
//! API, because the API truncates results at 2000 rows. That path
//! authenticates with the `sid` cookie instead of a bearer header.

use crate::config::Config;
use crate::error::ErrorKind;
use crate::http::AttemptError;
use crate::retry::retry_with_backoff;
use crate::types::{ReportDescriptor, ReportFormat, RetrievalOutcome, SessionHandle};
use futures::Stream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bodies shorter than this whose first line mentions `Error` are error pages
const SHORT_BODY_LEN: usize = 500;

/// How much of the body is inspected for HTML markers
const SNIFF_LEN: usize = 2048;

/// Longest first line quoted in an [`ErrorKind::InvalidContent`] message
const QUOTED_LINE_LEN: usize = 100;

/// Downloads report content, one report at a time
pub struct ReportFetcher {
    http_client: reqwest::Client,
    config: Config,
}

impl ReportFetcher {
    /// Create a fetcher sharing `http_client`
    pub fn new(http_client: reqwest::Client, config: Config) -> Self {
        Self {
            http_client,
            config,
        }
    }

    /// Export URL for one report
    pub fn export_url(session: &SessionHandle, report: &ReportDescriptor) -> String {
        format!(
            "{}/{}?isdtp=p1&export=1&enc=UTF-8&xf=csv",
            session.base(),
            urlencoding::encode(&report.id)
        )
    }

    /// Retrieve one report
    ///
    /// Joined reports are rejected before any request is made. Everything
    /// else is fetched with the configured retry policy; 429, 5xx and
    /// transport failures are retried, any other 4xx is terminal.
    pub async fn retrieve(
        &self,
        session: &SessionHandle,
        report: &ReportDescriptor,
    ) -> RetrievalOutcome {
        if report.format == ReportFormat::Joined {
            let message = "joined reports cannot be exported as CSV";
            warn!(report_id = %report.id, report = %report.name, "{}", message);
            return RetrievalOutcome::failure(report, ErrorKind::UnsupportedType, message, 0);
        }

        let url = Self::export_url(session, report);
        debug!(report_id = %report.id, %url, "Exporting report");

        let mut attempts = 0u32;
        let result = retry_with_backoff(&self.config.retry, || {
            attempts += 1;
            self.fetch_once(session, &url)
        })
        .await;

        match result {
            Ok(data) => {
                info!(
                    report_id = %report.id,
                    report = %report.name,
                    bytes = data.len(),
                    attempts,
                    "Exported report"
                );
                RetrievalOutcome::success(data)
            }
            Err(e) => {
                warn!(
                    report_id = %report.id,
                    report = %report.name,
                    kind = %e.kind,
                    attempts,
                    error = %e.message,
                    "Report export failed"
                );
                RetrievalOutcome::failure(report, e.kind, e.message, attempts)
            }
        }
    }

    /// Retrieve `reports` in order as a lazy stream
    ///
    /// Exactly one outcome is yielded per report until `cancel` fires; the
    /// token is checked between reports, never mid-request. Consecutive
    /// reports that hit the network are spaced by at least
    /// `export.inter_request_delay`, measured from the end of the previous
    /// retrieval.
    pub fn retrieve_all<'a>(
        &'a self,
        session: &'a SessionHandle,
        reports: Vec<ReportDescriptor>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = (ReportDescriptor, RetrievalOutcome)> + 'a {
        let state = StreamState {
            fetcher: self,
            session,
            reports: reports.into_iter(),
            cancel,
            last_request: None,
        };

        futures::stream::unfold(state, |mut state| async move {
            if state.cancel.is_cancelled() {
                return None;
            }
            let report = state.reports.next()?;

            let touches_network = report.format != ReportFormat::Joined;
            if touches_network {
                if let Some(last) = state.last_request {
                    let resume_at = last + state.fetcher.config.export.inter_request_delay;
                    tokio::select! {
                        _ = state.cancel.cancelled() => return None,
                        _ = tokio::time::sleep_until(resume_at) => {}
                    }
                }
            }

            let outcome = state.fetcher.retrieve(state.session, &report).await;
            if touches_network {
                state.last_request = Some(Instant::now());
            }
            Some(((report, outcome), state))
        })
    }

    async fn fetch_once(
        &self,
        session: &SessionHandle,
        url: &str,
    ) -> std::result::Result<Vec<u8>, AttemptError> {
        let timeout = self.config.http.export_timeout;
        let response = self
            .http_client
            .get(url)
            .header(reqwest::header::COOKIE, format!("sid={}", session.token()))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| AttemptError::from_transport(e, "export report", timeout))?;

        if !response.status().is_success() {
            return Err(AttemptError::from_response(&response));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AttemptError::from_transport(e, "export report", timeout))?;

        validate_body(&body)?;
        Ok(body.to_vec())
    }
}

struct StreamState<'a> {
    fetcher: &'a ReportFetcher,
    session: &'a SessionHandle,
    reports: std::vec::IntoIter<ReportDescriptor>,
    cancel: CancellationToken,
    last_request: Option<Instant>,
}

/// Reject 2xx bodies that are not tabular data
///
/// The export endpoint answers 200 with an HTML page when the session has
/// lapsed, when access is denied, or when the report type has no CSV form.
pub(crate) fn validate_body(body: &[u8]) -> std::result::Result<(), AttemptError> {
    if body.trim_ascii().is_empty() {
        return Err(AttemptError::new(
            ErrorKind::InvalidContent,
            "empty response body",
        ));
    }

    let head = String::from_utf8_lossy(&body[..body.len().min(SNIFF_LEN)]);
    let trimmed = head.trim_start();
    let lowered = trimmed.to_ascii_lowercase();
    if lowered.starts_with("<!doctype") || lowered.starts_with("<html") {
        let page = String::from_utf8_lossy(body);
        return Err(if page.contains("login.salesforce.com") || page.contains("ec=302") {
            AttemptError::new(
                ErrorKind::SessionExpired,
                "session expired or invalid (redirected to login)",
            )
        } else if page.contains("You do not have access") {
            AttemptError::new(ErrorKind::Permission, "access denied to this report")
        } else {
            AttemptError::new(
                ErrorKind::InvalidContent,
                "received HTML instead of CSV; report may not be exportable",
            )
        });
    }

    if body.len() < SHORT_BODY_LEN {
        let first_line = trimmed.lines().next().unwrap_or("");
        if first_line.contains("Error") {
            let quoted: String = first_line.chars().take(QUOTED_LINE_LEN).collect();
            return Err(AttemptError::new(
                ErrorKind::InvalidContent,
                format!("remote error: {}", quoted.trim_end()),
            ));
        }
    }

    Ok(())
}
