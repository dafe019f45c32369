//! Archive assembly.
//!
//! Outcomes are consumed one at a time: each success becomes a deflated
//! `.csv` entry as soon as it arrives, failures are only recorded. When the
//! stream ends a plain-text summary entry is appended and the archive is
//! finalized.
//!
//! The archive is built at `<destination>.part` and renamed into place once
//! the central directory has been written and synced, so `destination` only
//! ever holds a complete, re-openable archive. If writing fails the part file
//! is removed.

use crate::config::ExportConfig;
use crate::error::Result;
use crate::types::{
    ApiVersion, ExportSummary, ReportDescriptor, RetrievalOutcome, SessionHandle,
};
use crate::utils::safe_filename;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::CompressionMethod;
use zip::write::{FileOptions, ZipWriter};

/// Extension of every data entry
const DATA_EXTENSION: &str = "csv";

/// Run metadata written into the summary entry
#[derive(Clone, Debug, Default)]
pub struct ArchiveContext {
    /// Instance the reports came from
    pub instance_url: String,
    /// API version the run negotiated
    pub api_version: Option<ApiVersion>,
    /// Display name of the exporting user
    pub user: String,
    /// Reports returned by the listing
    pub total: usize,
}

impl ArchiveContext {
    /// Context for a run over `total` reports listed with `session`
    pub fn for_session(session: &SessionHandle, total: usize) -> Self {
        Self {
            instance_url: session.base().to_string(),
            api_version: Some(session.api_version()),
            user: session.user().display_name.clone(),
            total,
        }
    }
}

/// Hands out unique, filesystem-safe entry names
///
/// Names are compared case-insensitively so the archive extracts cleanly on
/// case-insensitive filesystems. The first use of a stem gets `stem.csv`,
/// later ones `stem_2.csv`, `stem_3.csv`, ...
#[derive(Debug)]
pub struct FilenameAllocator {
    max_len: usize,
    used: HashSet<String>,
}

impl FilenameAllocator {
    /// Allocator capping stems at `max_len` characters
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            used: HashSet::new(),
        }
    }

    /// Reserve an entry name for a report display name
    pub fn allocate(&mut self, display_name: &str) -> String {
        let stem = safe_filename(display_name, self.max_len);
        let mut candidate = format!("{}.{}", stem, DATA_EXTENSION);
        let mut suffix = 2u32;
        while self.used.contains(&candidate.to_lowercase()) {
            candidate = format!("{}_{}.{}", stem, suffix, DATA_EXTENSION);
            suffix += 1;
        }
        self.used.insert(candidate.to_lowercase());
        candidate
    }

    /// Mark `name` as taken so no report is given it
    pub fn reserve(&mut self, name: &str) {
        self.used.insert(name.to_lowercase());
    }
}

/// Incremental ZIP writer for one export run
pub struct ArchiveAssembler {
    writer: Option<ZipWriter<File>>,
    part_path: PathBuf,
    destination: PathBuf,
    names: FilenameAllocator,
    summary_entry_name: String,
    context: ArchiveContext,
    summary: ExportSummary,
}

impl ArchiveAssembler {
    /// Start a new archive bound for `destination`
    ///
    /// # Errors
    ///
    /// [`Error::Io`](crate::Error::Io) when the part file cannot be created.
    pub fn create(
        destination: &Path,
        context: ArchiveContext,
        config: &ExportConfig,
    ) -> Result<Self> {
        let part_path = part_path_for(destination);
        let file = File::create(&part_path)?;
        debug!(path = %part_path.display(), "Started archive");

        let summary = ExportSummary {
            total: context.total,
            archive_path: destination.to_path_buf(),
            ..ExportSummary::default()
        };

        let mut names = FilenameAllocator::new(config.max_filename_len);
        names.reserve(&config.summary_entry_name);

        Ok(Self {
            writer: Some(ZipWriter::new(file)),
            part_path,
            destination: destination.to_path_buf(),
            names,
            summary_entry_name: config.summary_entry_name.clone(),
            context,
            summary,
        })
    }

    /// Record one outcome, writing an entry for a success
    ///
    /// # Errors
    ///
    /// [`Error::Io`](crate::Error::Io) or [`Error::Archive`](crate::Error::Archive)
    /// when the entry cannot be written.
    pub fn push(&mut self, report: &ReportDescriptor, outcome: RetrievalOutcome) -> Result<()> {
        self.summary.attempted += 1;
        match outcome {
            RetrievalOutcome::Success { data, byte_len } => {
                let name = self.names.allocate(&report.name);
                self.write_entry(&name, &data)?;
                debug!(report_id = %report.id, entry = %name, bytes = byte_len, "Added entry");
                self.summary.succeeded += 1;
                self.summary.bytes_written += byte_len as u64;
                self.summary.entries.push(name);
            }
            RetrievalOutcome::Failure(record) => {
                self.summary.failures.push(record);
            }
        }
        Ok(())
    }

    /// Summary of what has been pushed so far
    pub fn summary(&self) -> &ExportSummary {
        &self.summary
    }

    /// Write the summary entry, finalize, and move the archive into place
    ///
    /// The run counts as cancelled when fewer outcomes were pushed than the
    /// listing returned.
    ///
    /// # Errors
    ///
    /// [`Error::Io`](crate::Error::Io) or [`Error::Archive`](crate::Error::Archive);
    /// the part file is removed.
    pub fn finish(mut self) -> Result<ExportSummary> {
        self.summary.cancelled = self.summary.attempted < self.summary.total;

        let text = render_summary(&self.summary, &self.context, Utc::now());
        let summary_name = self.summary_entry_name.clone();
        self.write_entry(&summary_name, text.as_bytes())?;

        let Some(writer) = self.writer.take() else {
            return Err(std::io::Error::other("archive already finalized").into());
        };
        if let Err(e) = finalize(writer, &self.part_path, &self.destination) {
            // Drop no longer sees a writer, so clean up here
            let _ = std::fs::remove_file(&self.part_path);
            return Err(e);
        }

        info!(
            path = %self.destination.display(),
            entries = self.summary.succeeded,
            failed = self.summary.failed(),
            cancelled = self.summary.cancelled,
            "Archive written"
        );
        Ok(std::mem::take(&mut self.summary))
    }

    fn write_entry(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(std::io::Error::other("archive already finalized").into());
        };
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644)
            .large_file(data.len() as u64 >= u64::from(u32::MAX));
        writer.start_file(name, options)?;
        writer.write_all(data)?;
        Ok(())
    }
}

impl Drop for ArchiveAssembler {
    fn drop(&mut self) {
        // Still holding a writer means finish() never completed
        if let Some(writer) = self.writer.take() {
            drop(writer);
            if let Err(e) = std::fs::remove_file(&self.part_path) {
                warn!(path = %self.part_path.display(), error = %e, "Failed to remove partial archive");
            }
        }
    }
}

/// Consume an outcome stream into an archive at `destination`
///
/// Entries are compressed and written on the blocking thread pool, one
/// outcome at a time, so large reports do not stall the runtime.
///
/// # Errors
///
/// Only destination write failures are returned; report failures are part
/// of the summary.
pub async fn assemble<S>(
    outcomes: S,
    destination: &Path,
    context: ArchiveContext,
    config: &ExportConfig,
) -> Result<ExportSummary>
where
    S: Stream<Item = (ReportDescriptor, RetrievalOutcome)>,
{
    let destination = destination.to_path_buf();
    let config = config.clone();
    let mut assembler =
        run_blocking(move || ArchiveAssembler::create(&destination, context, &config)).await?;

    futures::pin_mut!(outcomes);
    while let Some((report, outcome)) = outcomes.next().await {
        // A failed push drops the assembler on the blocking thread, removing the part file
        assembler = run_blocking(move || {
            assembler.push(&report, outcome)?;
            Ok(assembler)
        })
        .await?;
    }
    run_blocking(move || assembler.finish()).await
}

/// Run synchronous archive work off the async runtime
async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| std::io::Error::other(format!("archive task panicked: {}", e)))?
}

/// Human-readable summary entry
pub fn render_summary(
    summary: &ExportSummary,
    context: &ArchiveContext,
    exported_at: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail
    let _ = writeln!(out, "Salesforce Report Export Summary");
    let _ = writeln!(out, "================================");
    let _ = writeln!(out);
    let _ = writeln!(out, "Export date: {}", exported_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if !context.instance_url.is_empty() {
        let _ = writeln!(out, "Instance:    {}", context.instance_url);
    }
    if let Some(version) = context.api_version {
        let _ = writeln!(out, "API version: {}", version);
    }
    if !context.user.is_empty() {
        let _ = writeln!(out, "User:        {}", context.user);
    }
    let _ = writeln!(out);

    if summary.total == 0 {
        let _ = writeln!(out, "No reports found in this Salesforce org.");
        return out;
    }

    let _ = writeln!(out, "Total reports: {}", summary.total);
    let _ = writeln!(out, "Attempted:     {}", summary.attempted);
    let _ = writeln!(out, "Exported:      {}", summary.succeeded);
    let _ = writeln!(out, "Failed:        {}", summary.failed());
    if summary.cancelled {
        let _ = writeln!(
            out,
            "Cancelled:     yes ({} reports not attempted)",
            summary.total.saturating_sub(summary.attempted)
        );
    }

    if !summary.failures.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Failed reports");
        let _ = writeln!(out, "--------------");
        for failure in &summary.failures {
            let _ = writeln!(
                out,
                "- {} ({}, {})",
                failure.report_name, failure.format, failure.report_id
            );
            let _ = writeln!(out, "  {}: {}", failure.kind, failure.message);
            if failure.attempts > 1 {
                let _ = writeln!(out, "  after {} attempts", failure.attempts);
            }
        }
    }
    out
}

fn finalize(mut writer: ZipWriter<File>, part_path: &Path, destination: &Path) -> Result<()> {
    let file = writer.finish()?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(part_path, destination)?;
    Ok(())
}

fn part_path_for(destination: &Path) -> PathBuf {
    let mut os = destination.as_os_str().to_owned();
    os.push(".part");
    PathBuf::from(os)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ErrorKind};
    use crate::types::ReportFormat;
    use std::io::Read;
    use tempfile::TempDir;

    fn entry_names(path: &Path) -> Vec<String> {
        let file = File::open(path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    fn read_entry(path: &Path, name: &str) -> String {
        let file = File::open(path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let mut entry = archive.by_name(name).unwrap();
        let mut text = String::new();
        entry.read_to_string(&mut text).unwrap();
        text
    }

    fn context(total: usize) -> ArchiveContext {
        ArchiveContext {
            instance_url: "https://na1.salesforce.com".to_string(),
            api_version: Some(ApiVersion::new(58, 0)),
            user: "Ada Lovelace".to_string(),
            total,
        }
    }

    fn report(id: &str, name: &str, format: ReportFormat) -> ReportDescriptor {
        ReportDescriptor::new(id, name, format)
    }

    #[test]
    fn test_allocator_suffixes_duplicates() {
        let mut names = FilenameAllocator::new(100);
        assert_eq!(names.allocate("Pipeline"), "Pipeline.csv");
        assert_eq!(names.allocate("Pipeline"), "Pipeline_2.csv");
        assert_eq!(names.allocate("pipeline"), "pipeline_3.csv");
        assert_eq!(names.allocate("Q1/Q2: Won?"), "Q1_Q2_ Won.csv");
        assert_eq!(names.allocate("***"), "unnamed_report.csv");
        assert_eq!(names.allocate(""), "unnamed_report_2.csv");
    }

    #[test]
    fn test_allocator_caps_length() {
        let mut names = FilenameAllocator::new(10);
        assert_eq!(names.allocate("A very long report name"), "A very lon.csv");
    }

    #[test]
    fn test_reserved_name_is_never_allocated() {
        let mut names = FilenameAllocator::new(100);
        names.reserve("Summary.CSV");
        assert_eq!(names.allocate("summary"), "summary_2.csv");
    }

    #[tokio::test]
    async fn test_summary_entry_name_does_not_collide_with_reports() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("reports.zip");
        let config = ExportConfig {
            summary_entry_name: "Pipeline.csv".to_string(),
            ..ExportConfig::default()
        };

        let outcomes = vec![(
            report("00OA", "Pipeline", ReportFormat::Tabular),
            RetrievalOutcome::success(b"a,b\n".to_vec()),
        )];
        let summary = assemble(futures::stream::iter(outcomes), &dest, context(1), &config)
            .await
            .unwrap();

        assert_eq!(summary.entries, vec!["Pipeline_2.csv"]);
        assert_eq!(entry_names(&dest), vec!["Pipeline_2.csv", "Pipeline.csv"]);
        assert_eq!(read_entry(&dest, "Pipeline_2.csv"), "a,b\n");
        assert!(read_entry(&dest, "Pipeline.csv").contains("Exported:      1"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_assemble_keeps_runtime_responsive() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("large.zip");
        let ticks = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let counter = ticks.clone();
        let ticker = tokio::spawn(async move {
            loop {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                tokio::task::yield_now().await;
            }
        });

        let body: Vec<u8> = (0..8 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
        let outcomes = vec![(
            report("00OA", "Large", ReportFormat::Tabular),
            RetrievalOutcome::success(body),
        )];
        let summary = assemble(
            futures::stream::iter(outcomes),
            &dest,
            context(1),
            &ExportConfig::default(),
        )
        .await
        .unwrap();
        ticker.abort();

        assert_eq!(summary.succeeded, 1);
        // The single runtime thread kept polling other tasks while the entry was compressed
        assert!(ticks.load(std::sync::atomic::Ordering::SeqCst) > 1);
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path_for(Path::new("/tmp/out.zip")),
            PathBuf::from("/tmp/out.zip.part")
        );
    }

    #[tokio::test]
    async fn test_assemble_writes_successes_and_summary() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("reports.zip");

        let outcomes = vec![
            (
                report("00OA", "Pipeline", ReportFormat::Tabular),
                RetrievalOutcome::success(b"a,b\n1,2\n".to_vec()),
            ),
            (
                report("00OB", "Joined", ReportFormat::Joined),
                RetrievalOutcome::failure(
                    &report("00OB", "Joined", ReportFormat::Joined),
                    ErrorKind::UnsupportedType,
                    "joined reports cannot be exported as CSV",
                    0,
                ),
            ),
            (
                report("00OC", "Pipeline", ReportFormat::Summary),
                RetrievalOutcome::success("naïve,日本\n".as_bytes().to_vec()),
            ),
        ];

        let summary = assemble(
            futures::stream::iter(outcomes),
            &dest,
            context(3),
            &ExportConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed(), 1);
        assert!(!summary.cancelled);
        assert_eq!(summary.entries, vec!["Pipeline.csv", "Pipeline_2.csv"]);
        assert_eq!(summary.archive_path, dest);

        assert_eq!(
            entry_names(&dest),
            vec!["Pipeline.csv", "Pipeline_2.csv", "_EXPORT_SUMMARY.txt"]
        );
        assert_eq!(read_entry(&dest, "Pipeline_2.csv"), "naïve,日本\n");

        let text = read_entry(&dest, "_EXPORT_SUMMARY.txt");
        assert!(text.contains("Exported:      2"));
        assert!(text.contains("Failed:        1"));
        assert!(text.contains("- Joined (JOINED, 00OB)"));
        assert!(text.contains("UnsupportedTypeError"));
        assert!(text.contains("API version: 58.0"));

        assert!(!part_path_for(&dest).exists());
    }

    #[tokio::test]
    async fn test_assemble_empty_run() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("empty.zip");

        let summary = assemble(
            futures::stream::iter(Vec::new()),
            &dest,
            context(0),
            &ExportConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(summary.attempted, 0);
        assert_eq!(entry_names(&dest), vec!["_EXPORT_SUMMARY.txt"]);
        assert!(read_entry(&dest, "_EXPORT_SUMMARY.txt").contains("No reports found"));
    }

    #[tokio::test]
    async fn test_short_stream_is_marked_cancelled() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("partial.zip");

        let outcomes = vec![(
            report("00OA", "First", ReportFormat::Tabular),
            RetrievalOutcome::success(b"x\n".to_vec()),
        )];
        let summary = assemble(
            futures::stream::iter(outcomes),
            &dest,
            context(4),
            &ExportConfig::default(),
        )
        .await
        .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.succeeded + summary.failed(), summary.attempted);
        assert_eq!(entry_names(&dest).len(), 2);
        assert!(read_entry(&dest, "_EXPORT_SUMMARY.txt").contains("3 reports not attempted"));
    }

    #[tokio::test]
    async fn test_unwritable_destination_is_io_error() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("missing").join("reports.zip");

        let err = assemble(
            futures::stream::iter(Vec::new()),
            &dest,
            context(0),
            &ExportConfig::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Io(_)), "got {:?}", err);
        assert!(!dest.exists());
    }

    #[test]
    fn test_dropped_assembler_removes_part_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("aborted.zip");

        let mut assembler =
            ArchiveAssembler::create(&dest, context(1), &ExportConfig::default()).unwrap();
        assembler
            .push(
                &report("00OA", "A", ReportFormat::Tabular),
                RetrievalOutcome::success(b"x\n".to_vec()),
            )
            .unwrap();
        assert!(part_path_for(&dest).exists());

        drop(assembler);
        assert!(!part_path_for(&dest).exists());
        assert!(!dest.exists());
    }

    #[test]
    fn test_render_summary_lists_failures_with_attempts() {
        let failed = report("00OX", "Big", ReportFormat::Matrix);
        let summary = ExportSummary {
            total: 1,
            attempted: 1,
            failures: vec![
                RetrievalOutcome::failure(&failed, ErrorKind::ServerFault, "HTTP 503", 3)
                    .as_failure()
                    .cloned()
                    .unwrap(),
            ],
            ..ExportSummary::default()
        };
        let at = DateTime::parse_from_rfc3339("2024-01-31T09:15:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let text = render_summary(&summary, &context(1), at);
        assert!(text.contains("Export date: 2024-01-31 09:15:00 UTC"));
        assert!(text.contains("- Big (MATRIX, 00OX)"));
        assert!(text.contains("ServerError: HTTP 503"));
        assert!(text.contains("after 3 attempts"));
        assert!(!text.contains("Cancelled"));
    }
}
