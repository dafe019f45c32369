//! Utility functions for naming, escaping and header parsing

use chrono::{DateTime, Local, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Stem used when a report name sanitizes to nothing
pub const UNNAMED_REPORT: &str = "unnamed_report";

/// Make a report name safe to use as an archive entry stem
///
/// Letters and digits (any script) are kept along with space, `.`, `_` and
/// `-`; everything else becomes `_`. Runs of `_` collapse, leading and
/// trailing `_`/space are trimmed, and the result is capped at `max_len`
/// characters.
///
/// # Examples
///
/// ```
/// use sf_report_export::utils::safe_filename;
///
/// assert_eq!(safe_filename("Q1: Pipeline / West", 100), "Q1_ Pipeline _ West");
/// assert_eq!(safe_filename("???", 100), "unnamed_report");
/// ```
#[must_use]
pub fn safe_filename(name: &str, max_len: usize) -> String {
    let mut safe = String::with_capacity(name.len());
    for c in name.chars() {
        let mapped = if c.is_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-') {
            c
        } else {
            '_'
        };
        if mapped == '_' && safe.ends_with('_') {
            continue;
        }
        safe.push(mapped);
    }

    let trimmed: String = safe
        .trim_matches(|c| c == '_' || c == ' ')
        .chars()
        .take(max_len)
        .collect();
    // Truncation can expose a trailing dot or space, which Windows rejects
    let trimmed = trimmed.trim_end_matches(['.', ' ']);

    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        UNNAMED_REPORT.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Scheme and host prefix of a SOAP `serverUrl`
///
/// `https://na1.salesforce.com/services/Soap/u/58.0/00D...` becomes
/// `https://na1.salesforce.com`.
pub fn extract_instance_url(server_url: &str) -> Option<String> {
    let parsed = url::Url::parse(server_url.trim()).ok()?;
    let host = parsed.host_str()?;
    let origin = match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    };
    Some(origin)
}

/// Escape the five XML special characters
pub fn xml_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '\'' => escaped.push_str("&apos;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Undo [`xml_escape`] plus numeric character references
pub fn xml_unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(end) = tail.find(';') else {
            out.push_str(tail);
            return out;
        };
        let entity = &tail[1..end];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "apos" => Some('\''),
            "quot" => Some('"'),
            _ => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Parse a `Retry-After` header value
///
/// Accepts delta-seconds (`"120"`) or an HTTP-date
/// (`"Wed, 21 Oct 2015 07:28:00 GMT"`). A date in the past yields zero.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = when.with_timezone(&Utc) - now;
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Default archive file name, e.g. `salesforce_reports_20240131_0915.zip`
pub fn default_archive_name(now: DateTime<Local>) -> String {
    format!("salesforce_reports_{}.zip", now.format("%Y%m%d_%H%M"))
}

/// Append `.zip` unless the path already ends with it (any case)
pub fn ensure_zip_extension(path: &Path) -> PathBuf {
    let has_zip = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
    if has_zip {
        path.to_path_buf()
    } else {
        let mut os = path.as_os_str().to_owned();
        os.push(".zip");
        PathBuf::from(os)
    }
}
