//! Data models for raw candidates, scraped records, and run reports.
//!
//! This module defines the core data structures used throughout the application:
//! - [`HtmlCandidate`] and [`JsonCandidate`]: raw elements handed out by sources
//! - [`ScrapedRecord`]: one mapped item, flat field map plus provenance
//! - [`CollectionReport`]: everything written to disk for one run

use crate::collector::{CollectorStats, Termination};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// One element matched by a profile's item selector.
///
/// The element is kept as its outer HTML so candidates stay `Send` and can
/// outlive the parsed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlCandidate {
    /// Outer HTML of the matched element.
    pub html: String,
    /// Page the element was found on; relative links resolve against it.
    pub page_url: Url,
    /// Zero-based page counter of the source.
    pub page: usize,
    /// Position of the element on its page.
    pub index: usize,
}

/// One entry of the item array in a JSON API response.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonCandidate {
    pub value: serde_json::Value,
    pub page_url: Url,
    pub page: usize,
    pub index: usize,
}

/// A mapped item as written to the output files.
///
/// Fields are flattened into the JSON object next to the provenance keys,
/// so a record serializes as
/// `{"source": "...", "page": 0, "title": "...", "url": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScrapedRecord {
    /// Page URL the item was scraped from.
    pub source: String,
    /// Zero-based page counter at the time of scraping.
    pub page: usize,
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

impl ScrapedRecord {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

/// Everything persisted about one collection run.
///
/// Failed runs still produce a report: `termination` is `None`, `error`
/// explains what went wrong, and `records` holds the partial results.
#[derive(Debug, Serialize)]
pub struct CollectionReport {
    pub profile: String,
    pub query: Option<String>,
    /// RFC 3339 timestamp.
    pub started_at: String,
    /// RFC 3339 timestamp.
    pub finished_at: String,
    pub termination: Option<Termination>,
    pub error: Option<String>,
    pub stats: CollectorStats,
    pub records: Vec<ScrapedRecord>,
}

impl CollectionReport {
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}
