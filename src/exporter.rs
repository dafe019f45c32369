//! End-to-end export runs
//!
//! [`ReportExporter`] wires the four stages together: negotiate a session,
//! list reports, retrieve them one by one, and stream the outcomes into an
//! archive. Negotiation, listing and archive failures abort the run; report
//! failures never do.

use crate::archive::{ArchiveContext, assemble};
use crate::config::Config;
use crate::error::Result;
use crate::http::build_client;
use crate::listing::ReportLister;
use crate::observer::ExportObserver;
use crate::retrieval::ReportFetcher;
use crate::session::SessionNegotiator;
use crate::types::{Credentials, ExportSummary, ReportDescriptor, RetrievalOutcome, SessionHandle};
use crate::utils::ensure_zip_extension;
use futures::StreamExt;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Exports every report visible to a user into one ZIP archive
///
/// The stages are also exposed individually for callers that want to drive
/// the pipeline themselves.
///
/// # Example
///
/// ```no_run
/// use sf_report_export::{Config, Credentials, EventObserver, ReportExporter};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let exporter = ReportExporter::new(Config::default())?;
/// let observer = EventObserver::default();
/// let credentials = Credentials::new("ada@example.com", "hunter2").with_security_token("TOKEN");
///
/// let summary = exporter
///     .export(credentials, "reports.zip".as_ref(), &observer, CancellationToken::new())
///     .await?;
/// println!("{} exported, {} failed", summary.succeeded, summary.failed());
/// # Ok(())
/// # }
/// ```
pub struct ReportExporter {
    config: Config,
    negotiator: SessionNegotiator,
    lister: ReportLister,
    fetcher: ReportFetcher,
}

impl ReportExporter {
    /// Create an exporter
    ///
    /// # Errors
    ///
    /// [`Error::Config`](crate::Error::Config) if the configuration is invalid
    /// or the HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let http_client = build_client(&config.http)?;

        Ok(Self {
            negotiator: SessionNegotiator::new(http_client.clone(), config.clone()),
            lister: ReportLister::new(http_client.clone(), config.clone()),
            fetcher: ReportFetcher::new(http_client, config.clone()),
            config,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Log in and negotiate the API version
    pub async fn negotiate(&self, credentials: Credentials) -> Result<SessionHandle> {
        self.negotiator.negotiate(credentials).await
    }

    /// List the reports visible to a session
    pub async fn list_reports(&self, session: &SessionHandle) -> Result<Vec<ReportDescriptor>> {
        self.lister.list_reports(session).await
    }

    /// Retrieve a single report
    pub async fn retrieve(
        &self,
        session: &SessionHandle,
        report: &ReportDescriptor,
    ) -> RetrievalOutcome {
        self.fetcher.retrieve(session, report).await
    }

    /// Run a full export: log in, list, retrieve, archive
    ///
    /// `.zip` is appended to `destination` when missing. Cancelling `cancel`
    /// stops the run between reports; the archive is still finalized with
    /// what was retrieved and the summary is marked cancelled.
    ///
    /// The observer's `on_complete` or `on_error` is called exactly once.
    ///
    /// # Errors
    ///
    /// Negotiation and listing errors, and archive write failures.
    pub async fn export(
        &self,
        credentials: Credentials,
        destination: &Path,
        observer: &dyn ExportObserver,
        cancel: CancellationToken,
    ) -> Result<ExportSummary> {
        let result = async {
            observer.on_log(&format!("Logging in as {}", credentials.username()));
            let session = self.negotiate(credentials).await?;
            observer.on_log(&format!(
                "Connected to {} (API v{})",
                session.instance_url(),
                session.api_version()
            ));
            self.run(&session, destination, observer, cancel).await
        }
        .await;

        finish_run(result, observer)
    }

    /// Run an export with an already negotiated session
    ///
    /// Same contract as [`export`](Self::export) minus the login.
    pub async fn export_with_session(
        &self,
        session: &SessionHandle,
        destination: &Path,
        observer: &dyn ExportObserver,
        cancel: CancellationToken,
    ) -> Result<ExportSummary> {
        let result = self.run(session, destination, observer, cancel).await;
        finish_run(result, observer)
    }

    async fn run(
        &self,
        session: &SessionHandle,
        destination: &Path,
        observer: &dyn ExportObserver,
        cancel: CancellationToken,
    ) -> Result<ExportSummary> {
        let destination = ensure_zip_extension(destination);

        let reports = self.list_reports(session).await?;
        let total = reports.len();
        observer.on_log(&format!("Found {} reports", total));
        observer.on_progress(0, total);

        let context = ArchiveContext::for_session(session, total);
        let mut done = 0;
        let outcomes = self
            .fetcher
            .retrieve_all(session, reports, cancel)
            .inspect(move |(report, outcome)| {
                done += 1;
                match outcome {
                    RetrievalOutcome::Success { byte_len, .. } => {
                        observer.on_log(&format!("Exported {} ({} bytes)", report.name, byte_len));
                    }
                    RetrievalOutcome::Failure(failure) => {
                        observer.on_log(&format!(
                            "Failed {} [{}]: {}",
                            report.name, failure.kind, failure.message
                        ));
                    }
                }
                observer.on_progress(done, total);
            });

        let summary = assemble(outcomes, &destination, context, &self.config.export).await?;
        if summary.cancelled {
            observer.on_log(&format!(
                "Export cancelled after {} of {} reports",
                summary.attempted, summary.total
            ));
        }
        Ok(summary)
    }
}

fn finish_run(
    result: Result<ExportSummary>,
    observer: &dyn ExportObserver,
) -> Result<ExportSummary> {
    match &result {
        Ok(summary) => {
            info!(
                total = summary.total,
                succeeded = summary.succeeded,
                failed = summary.failed(),
                cancelled = summary.cancelled,
                path = %summary.archive_path.display(),
                "Export finished"
            );
            observer.on_complete(summary);
        }
        Err(e) => {
            error!(error = %e, kind = %e.kind(), "Export aborted");
            observer.on_error(e);
        }
    }
    result
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(matches!(
            ReportExporter::new(config),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_new_with_defaults() {
        let exporter = ReportExporter::new(Config::default()).unwrap();
        assert_eq!(exporter.config().retry.max_attempts, 3);
    }
}
