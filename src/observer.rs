//! Progress reporting for a presentation layer
//!
//! The exporter calls an [`ExportObserver`] synchronously at fixed points: after
//! each report has an outcome, for each log line, and once at the end of the
//! run. Implementations must return quickly; anything slow belongs on the
//! other side of a channel, which is what [`EventObserver`] provides.

use crate::error::Error;
use crate::types::{Event, ExportSummary};
use tokio::sync::broadcast;

/// Callbacks invoked during an export run
///
/// Every method has a no-op default, so implementors only override what
/// they display.
pub trait ExportObserver: Send + Sync {
    /// `done` of `total` reports have an outcome
    fn on_progress(&self, _done: usize, _total: usize) {}

    /// A human-readable log line
    fn on_log(&self, _message: &str) {}

    /// The run finished and the archive is complete
    fn on_complete(&self, _summary: &ExportSummary) {}

    /// The run aborted
    fn on_error(&self, _error: &Error) {}
}

/// Observer that ignores everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl ExportObserver for NoopObserver {}

/// Observer that republishes callbacks as [`Event`]s
///
/// Events go out over a `tokio::sync::broadcast` channel. With no
/// subscribers they are dropped; a lagging subscriber loses the oldest ones.
#[derive(Clone, Debug)]
pub struct EventObserver {
    event_tx: broadcast::Sender<Event>,
}

impl EventObserver {
    /// Observer with a channel buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _rx) = broadcast::channel(capacity.max(1));
        Self { event_tx }
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: Event) {
        // Err only means nobody is listening
        self.event_tx.send(event).ok();
    }
}

impl Default for EventObserver {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl ExportObserver for EventObserver {
    fn on_progress(&self, done: usize, total: usize) {
        self.emit(Event::Progress { done, total });
    }

    fn on_log(&self, message: &str) {
        self.emit(Event::Log {
            message: message.to_string(),
        });
    }

    fn on_complete(&self, summary: &ExportSummary) {
        self.emit(Event::Completed {
            summary: summary.clone(),
        });
    }

    fn on_error(&self, error: &Error) {
        self.emit(Event::Failed {
            kind: error.kind(),
            error: error.to_string(),
        });
    }
}
