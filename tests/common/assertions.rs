//! Archive inspection helpers

use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Entry names of a finished archive, in archive order
pub fn archive_entries(path: &Path) -> Vec<String> {
    let file = File::open(path).expect("archive should exist");
    let mut archive = zip::ZipArchive::new(file).expect("archive should be readable");
    (0..archive.len())
        .map(|i| archive.by_index(i).expect("entry").name().to_string())
        .collect()
}

/// Decoded contents of one archive entry
pub fn read_entry(path: &Path, name: &str) -> String {
    let file = File::open(path).expect("archive should exist");
    let mut archive = zip::ZipArchive::new(file).expect("archive should be readable");
    let mut entry = archive
        .by_name(name)
        .unwrap_or_else(|e| panic!("missing entry {}: {}", name, e));
    let mut text = String::new();
    entry.read_to_string(&mut text).expect("entry should be UTF-8");
    text
}

/// Assert the accounting invariant every summary must satisfy
pub fn assert_summary_consistent(summary: &sf_report_export::ExportSummary, archive: &Path) {
    assert_eq!(
        summary.succeeded + summary.failed(),
        summary.attempted,
        "every attempted report has exactly one outcome"
    );
    assert_eq!(summary.entries.len(), summary.succeeded);
    // Data entries plus the summary entry
    assert_eq!(archive_entries(archive).len(), summary.succeeded + 1);
    if !summary.cancelled {
        assert_eq!(summary.attempted, summary.total);
    }
}
