//! Error types for fetching, extraction, profiles, and collection runs.
//!
//! Errors fall into two tiers:
//!
//! - **Item level** ([`ExtractionError`]): one candidate could not be
//!   fingerprinted or mapped. The collector logs it, skips the item, and keeps
//!   going. These never reach the caller.
//! - **Run level** ([`SourceError`] wrapped in [`CollectionError`]): the
//!   content source itself failed. The run stops and the caller receives the
//!   error together with every record collected up to that point.

use crate::collector::CollectorStats;
use crate::models::ScrapedRecord;
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Failure while downloading a page.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("could not build HTTP client: {reason}")]
    Client { reason: String },

    #[error("invalid header `{name}`")]
    InvalidHeader { name: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {reason}")]
    Network { url: String, reason: String },

    #[error("{url} responded with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("could not read response body from {url}: {reason}")]
    Body { url: String, reason: String },
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Client errors (4xx) are permanent except for request timeouts (408)
    /// and rate limiting (429).
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Client { .. } | FetchError::InvalidHeader { .. } => false,
            FetchError::Status { status, .. } => {
                !(400..500).contains(status) || *status == 408 || *status == 429
            }
            FetchError::Timeout { .. } | FetchError::Network { .. } | FetchError::Body { .. } => {
                true
            }
        }
    }
}

/// Run-fatal failure of a content source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("response from {url} is not valid JSON: {reason}")]
    Decode { url: String, reason: String },

    #[error("could not build next page url: {0}")]
    Pagination(String),
}

/// Per-item failure; the item is skipped and the run continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("required field `{field}` is missing")]
    MissingField { field: String },

    #[error("fingerprint key is empty")]
    EmptyKey,

    #[error("`{value}` is not a valid url: {reason}")]
    InvalidUrl { value: String, reason: String },
}

/// Problems loading or validating a site profile.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("could not read profile {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("profile is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("selector `{selector}` for {context} does not parse: {reason}")]
    InvalidSelector {
        context: String,
        selector: String,
        reason: String,
    },

    #[error("start url `{url}` is invalid: {reason}")]
    InvalidStartUrl { url: String, reason: String },

    #[error("environment variable `{0}` holding the API key is not set")]
    MissingApiKey(String),

    #[error("invalid profile: {0}")]
    Invalid(String),
}

/// Rejected collector settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("stall_limit must be at least 1")]
    ZeroStallLimit,

    #[error("target_count must be at least 1 when set")]
    ZeroTarget,
}

/// Failure while persisting results.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("could not write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not serialize results: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not encode CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("no free file name for {stem} after {attempts} attempts")]
    NameTaken { stem: PathBuf, attempts: usize },
}

/// Where in the cycle a run-fatal source failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// While reading candidates from the current view.
    Candidates,
    /// While asking the source for more content.
    Advance,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Candidates => f.write_str("candidate extraction"),
            Phase::Advance => f.write_str("advance"),
        }
    }
}

/// A collection run aborted by its content source.
///
/// Always carries the records collected before the failure so a caller can
/// tell "nothing was there" apart from "we stopped early" and still decide
/// whether to persist partial output.
#[derive(Debug)]
pub struct CollectionError<R> {
    pub phase: Phase,
    pub cause: SourceError,
    pub records: Vec<R>,
    pub stats: CollectorStats,
}

impl<R> CollectionError<R> {
    /// Consume the error and keep the partial records.
    pub fn into_records(self) -> Vec<R> {
        self.records
    }
}

impl<R> fmt::Display for CollectionError<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "collection aborted during {} after {} records: {}",
            self.phase,
            self.records.len(),
            self.cause
        )
    }
}

impl<R: fmt::Debug> Error for CollectionError<R> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.cause)
    }
}

/// Anything that can stop one profile run, from setup to the last page.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Fetcher(#[from] FetchError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Collection(#[from] CollectionError<ScrapedRecord>),
}

impl HarvestError {
    /// Records collected before the run failed; empty for setup failures.
    pub fn partial_records(&self) -> &[ScrapedRecord] {
        match self {
            HarvestError::Collection(e) => &e.records,
            _ => &[],
        }
    }

    /// Collector counters at the point of failure, when the run got that far.
    pub fn stats(&self) -> Option<CollectorStats> {
        match self {
            HarvestError::Collection(e) => Some(e.stats),
            _ => None,
        }
    }
}
