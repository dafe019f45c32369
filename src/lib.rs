//! # sf-report-export
//!
//! Bulk exporter for Salesforce reports: logs in, lists every report the user
//! can see, downloads each one as CSV, and packs the results into a single ZIP
//! archive with a summary of what failed.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - No CLI or UI; a presentation layer plugs in through
//!   [`ExportObserver`]
//! - **Failure isolation** - One broken report never aborts a run; only
//!   login, listing and archive write failures do
//! - **Polite to the remote side** - Reports are fetched sequentially with
//!   pacing, exponential backoff and `Retry-After` support
//! - **Sensible defaults** - [`Config::default`] matches the remote system's
//!   expectations; every knob can be overridden
//!
//! ## Quick Start
//!
//! ```no_run
//! use sf_report_export::{
//!     Config, Credentials, Environment, EventObserver, ReportExporter, cancel_on_signal,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let exporter = ReportExporter::new(Config::default())?;
//!
//!     let observer = EventObserver::default();
//!     let mut events = observer.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     // Ctrl+C finishes the archive with whatever was exported so far
//!     let cancel = CancellationToken::new();
//!     tokio::spawn(cancel_on_signal(cancel.clone()));
//!
//!     let credentials = Credentials::new("ada@example.com", "hunter2")
//!         .with_security_token("TOKEN")
//!         .with_environment(Environment::Sandbox);
//!
//!     let summary = exporter
//!         .export(credentials, "reports.zip".as_ref(), &observer, cancel)
//!         .await?;
//!     println!("{} of {} reports exported", summary.succeeded, summary.total);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Archive assembly
pub mod archive;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// End-to-end export runs
pub mod exporter;
/// Shared HTTP client and failure classification
pub mod http;
/// Report listing
pub mod listing;
/// Caller-facing progress callbacks
pub mod observer;
/// Report retrieval
pub mod retrieval;
/// Retry logic with exponential backoff
pub mod retry;
/// Session negotiation
pub mod session;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use archive::{ArchiveAssembler, ArchiveContext, FilenameAllocator, assemble};
pub use config::{Config, ExportConfig, HttpConfig, ProtocolConfig, RetryConfig};
pub use error::{Error, ErrorKind, Result};
pub use exporter::ReportExporter;
pub use listing::ReportLister;
pub use observer::{EventObserver, ExportObserver, NoopObserver};
pub use retrieval::ReportFetcher;
pub use session::SessionNegotiator;
pub use types::{
    ApiVersion, Credentials, Environment, Event, ExportSummary, FailureRecord, ReportDescriptor,
    ReportFormat, RetrievalOutcome, SessionHandle, UserIdentity,
};

/// Cancel `token` when the process receives a termination signal.
///
/// An export run checks the token between reports, so the archive is still
/// finalized with everything retrieved before the signal.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn cancel_on_signal(token: tokio_util::sync::CancellationToken) {
    tokio::select! {
        _ = wait_for_signal() => {
            tracing::info!("Cancelling export");
            token.cancel();
        }
        _ = token.cancelled() => {}
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_cancel_on_signal_returns_when_token_cancelled_elsewhere() {
        let token = CancellationToken::new();
        let watcher = tokio::spawn(cancel_on_signal(token.clone()));

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), watcher)
            .await
            .expect("watcher should stop once the token is cancelled")
            .unwrap();
    }
}
