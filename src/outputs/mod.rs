//! Output sinks for collection reports.
//!
//! # Submodules
//!
//! - [`json`]: the whole [`CollectionReport`] as one pretty-printed document
//! - [`jsonl`]: one record per line, for piping into other tools
//! - [`csv`]: records as a table, one column per field
//!
//! # Output Structure
//!
//! Every run gets its own file, named after the profile, the query, and the
//! UTC start time. Runs that would land on the same name get a numeric
//! suffix instead of overwriting each other:
//!
//! ```text
//! output_dir/
//! ├── ebay-search_thinkpad-x1_20250506_143000.json
//! ├── ebay-search_thinkpad-x1_20250506_143000.records.jsonl
//! ├── ebay-search_thinkpad-x1_20250506_143000_1.json
//! ├── ebay-search_thinkpad-x1_20250506_143000_1.csv
//! └── cnn-lite_all_20250506_143002.json
//! ```
//!
//! The JSONL and CSV formats also write the report (without records) next to
//! the record file, so a failed run keeps its error message either way.

pub mod csv;
pub mod json;
pub mod jsonl;

use crate::error::OutputError;
use crate::models::CollectionReport;
use crate::utils::{slugify, timestamp_slug};
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, instrument};

/// Suffixes tried before giving up on a free file name.
const MAX_NAME_ATTEMPTS: usize = 1000;

/// File format selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One pretty-printed report per run.
    Json,
    /// Records as JSON lines plus a small report file.
    Jsonl,
    /// Records as CSV plus a small report file.
    Csv,
}

/// Base path (no extension) for one run's output files.
pub fn output_stem(
    output_dir: &Path,
    profile: &str,
    query: Option<&str>,
    started_at: &DateTime<Utc>,
) -> PathBuf {
    let query_slug = query.map(slugify).filter(|s| !s.is_empty());
    let name = format!(
        "{}_{}_{}",
        slugify(profile),
        query_slug.as_deref().unwrap_or("all"),
        timestamp_slug(started_at)
    );
    output_dir.join(name)
}

/// Claim the first free `{stem}.json`, `{stem}_1.json`, ... and return the
/// claimed stem.
///
/// The report file is created with `create_new`, so two runs racing for the
/// same name never end up sharing it. Record files reuse the claimed stem.
async fn reserve_stem(stem: &Path) -> Result<PathBuf, OutputError> {
    if let Some(parent) = stem.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| OutputError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let candidate = match attempt {
            0 => stem.to_path_buf(),
            n => PathBuf::from(format!("{}_{n}", stem.display())),
        };
        let path = candidate.with_extension("json");
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "Output name taken");
            }
            Err(source) => return Err(OutputError::Io { path, source }),
        }
    }
    Err(OutputError::NameTaken {
        stem: stem.to_path_buf(),
        attempts: MAX_NAME_ATTEMPTS,
    })
}

/// Write `report` in `format` and return the path of the main output file.
#[instrument(level = "info", skip_all, fields(profile = %report.profile, ?format))]
pub async fn persist(
    report: &CollectionReport,
    output_dir: &Path,
    format: OutputFormat,
) -> Result<PathBuf, OutputError> {
    let started_at = DateTime::parse_from_rfc3339(&report.started_at)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());
    let stem = output_stem(
        output_dir,
        &report.profile,
        report.query.as_deref(),
        &started_at,
    );
    let stem = reserve_stem(&stem).await?;
    let report_path = stem.with_extension("json");
    match format {
        OutputFormat::Json => {
            json::write_report(report, &report_path).await?;
            Ok(report_path)
        }
        OutputFormat::Jsonl => {
            let records_path = PathBuf::from(format!("{}.records.jsonl", stem.display()));
            jsonl::write_records(&report.records, &records_path).await?;
            json::write_summary(report, &report_path).await?;
            Ok(records_path)
        }
        OutputFormat::Csv => {
            let records_path = stem.with_extension("csv");
            self::csv::write_records(&report.records, &records_path).await?;
            json::write_summary(report, &report_path).await?;
            Ok(records_path)
        }
    }
}
