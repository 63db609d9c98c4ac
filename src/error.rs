//! Error taxonomy for template configuration, fetching and extraction.
//!
//! Per-target failures ([`ConfigError`], [`FetchError`],
//! [`TeasyError::ExtractionEmpty`]) are recorded in the run log and never stop
//! a run. [`TeasyError::BrowserUnavailable`] is the one fault that aborts it.

use crate::models::{Category, FetchStatus, Strategy};
use thiserror::Error;

/// Template or category misconfiguration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("site `{site_id}` has no rule for category `{category}`")]
    MissingCategory { site_id: String, category: Category },

    #[error("site `{site_id}`: search requested without any query term")]
    EmptyQueryTerms { site_id: String },

    #[error("site `{site_id}`: search pattern `{pattern}` has no {{s}} placeholder")]
    MissingPlaceholder { site_id: String, pattern: String },

    #[error("site `{site_id}`: selector for `{field}` is empty")]
    EmptySelector { site_id: String, field: String },

    #[error("site `{site_id}`: selector `{query}` for `{field}` does not parse: {reason}")]
    InvalidSelector {
        site_id: String,
        field: String,
        query: String,
        reason: String,
    },

    #[error("site `{site_id}`: invalid URL `{url}`: {reason}")]
    InvalidUrl {
        site_id: String,
        url: String,
        reason: String,
    },

    #[error("site `{site_id}`: bad pagination: {reason}")]
    InvalidPagination { site_id: String, reason: String },

    #[error("template is missing `{0}`")]
    MissingField(&'static str),

    #[error("cannot read template {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

/// A classified network or browser failure for a single target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status} via {strategy}: {detail}")]
pub struct FetchError {
    pub status: FetchStatus,
    pub strategy: Strategy,
    pub detail: String,
}

impl FetchError {
    pub fn new(status: FetchStatus, strategy: Strategy, detail: impl Into<String>) -> Self {
        Self {
            status,
            strategy,
            detail: detail.into(),
        }
    }
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum TeasyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("no teasers extracted from {url} ({items} list items matched)")]
    ExtractionEmpty { url: String, items: usize },

    #[error("browser session could not be started: {0}")]
    BrowserUnavailable(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl TeasyError {
    /// Whether this error ends only the current target rather than the run.
    pub fn is_per_target(&self) -> bool {
        matches!(
            self,
            TeasyError::Config(_) | TeasyError::Fetch(_) | TeasyError::ExtractionEmpty { .. }
        )
    }
}
