//! Data models shared by the resolver, fetcher, extractor and run orchestrator.
//!
//! This module defines the values that flow through a run:
//! - [`Target`]: one concrete listing page to fetch
//! - [`FetchResult`]: the rendered document and how it was obtained
//! - [`TeaserRecord`]: one extracted teaser
//! - [`RunLogEntry`] / [`RunSummary`]: the structured run log
//!
//! Templates live in [`crate::template`]; the deduplicated accumulation lives in
//! [`crate::dedup::ResultSet`].

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of listing categories a template can describe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    All,
    Search,
    Opinion,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::All => "all",
            Category::Search => "search",
            Category::Opinion => "opinion",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a document was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Network,
    Browser,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::Network => "network",
            Strategy::Browser => "browser",
        })
    }
}

/// Classification of a single fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Ok,
    HttpError,
    Timeout,
    Blocked,
    Empty,
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FetchStatus::Ok => "ok",
            FetchStatus::HttpError => "http_error",
            FetchStatus::Timeout => "timeout",
            FetchStatus::Blocked => "blocked",
            FetchStatus::Empty => "empty",
        })
    }
}

/// A single concrete page to fetch, produced by [`crate::resolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub site_id: String,
    pub category: Category,
    pub resolved_url: String,
    /// The query term as the caller supplied it (search targets only).
    pub query_term: Option<String>,
    /// The value substituted for `{s}` after mapping and encoding.
    pub term_used: Option<String>,
    pub page: u32,
}

/// Raw HTML plus the URL it was finally served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub final_url: String,
    pub html: String,
}

/// Outcome of a successful fetch. Failures are reported as [`crate::error::FetchError`].
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub document: Document,
    pub strategy_used: Strategy,
    pub consent_dismissed: bool,
    pub status: FetchStatus,
    pub fetched_at: DateTime<Utc>,
}

/// One teaser extracted from a listing page.
///
/// The identity key is derived from `url` by [`crate::dedup::identity_key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeaserRecord {
    pub site_id: String,
    pub category: Category,
    pub title: String,
    pub url: String,
    /// Date text as shown on the page.
    pub date: Option<String>,
    /// Best-effort parse of `date`.
    pub published_at: Option<NaiveDateTime>,
    pub section: Option<String>,
    pub summary: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Outcome of one target as recorded in the run log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Ok,
    HttpError,
    Timeout,
    Blocked,
    Empty,
    ConfigError,
    ExtractionEmpty,
}

impl From<FetchStatus> for EntryStatus {
    fn from(status: FetchStatus) -> Self {
        match status {
            FetchStatus::Ok => EntryStatus::Ok,
            FetchStatus::HttpError => EntryStatus::HttpError,
            FetchStatus::Timeout => EntryStatus::Timeout,
            FetchStatus::Blocked => EntryStatus::Blocked,
            FetchStatus::Empty => EntryStatus::Empty,
        }
    }
}

/// One processed target. Immutable once appended to the run log.
///
/// A target whose category could not be resolved has no `url` and no
/// `strategy_used`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub started_at: DateTime<Utc>,
    pub site_id: String,
    pub category: Category,
    pub url: Option<String>,
    pub query_term: Option<String>,
    pub page: Option<u32>,
    pub strategy_used: Option<Strategy>,
    pub consent_dismissed: bool,
    pub status: EntryStatus,
    pub records_found: usize,
    pub record_count_added: usize,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl RunLogEntry {
    pub fn is_failure(&self) -> bool {
        self.status != EntryStatus::Ok
    }
}

/// Run-level counts for the caller's success/failure display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_targets: usize,
    pub failed_targets: usize,
    pub total_added: usize,
}

impl RunSummary {
    pub fn from_log(log: &[RunLogEntry]) -> Self {
        Self {
            total_targets: log.len(),
            failed_targets: log.iter().filter(|e| e.is_failure()).count(),
            total_added: log.iter().map(|e| e.record_count_added).sum(),
        }
    }
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Aborted,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(status: EntryStatus, added: usize) -> RunLogEntry {
        RunLogEntry {
            started_at: Utc::now(),
            site_id: "site".to_string(),
            category: Category::All,
            url: Some("https://example.com".to_string()),
            query_term: None,
            page: Some(1),
            strategy_used: Some(Strategy::Network),
            consent_dismissed: false,
            status,
            records_found: added,
            record_count_added: added,
            duration_ms: 10,
            error: None,
        }
    }

    #[test]
    fn test_summary_counts_failures_and_additions() {
        let log = vec![
            entry(EntryStatus::Ok, 3),
            entry(EntryStatus::ConfigError, 0),
            entry(EntryStatus::Ok, 2),
        ];
        let summary = RunSummary::from_log(&log);
        assert_eq!(summary.total_targets, 3);
        assert_eq!(summary.failed_targets, 1);
        assert_eq!(summary.total_added, 5);
    }

    #[test]
    fn test_category_serialization() {
        let json = serde_json::to_string(&Category::Opinion).unwrap();
        assert_eq!(json, "\"opinion\"");
        let back: Category = serde_json::from_str("\"search\"").unwrap();
        assert_eq!(back, Category::Search);
    }

    #[test]
    fn test_entry_status_from_fetch_status() {
        assert_eq!(EntryStatus::from(FetchStatus::Blocked), EntryStatus::Blocked);
        assert_eq!(
            serde_json::to_string(&EntryStatus::HttpError).unwrap(),
            "\"http_error\""
        );
    }
}
