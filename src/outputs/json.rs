//! JSON report output.
//!
//! [`write_report`] serializes a whole [`CollectionReport`]; [`write_summary`]
//! writes the same document with `records` replaced by a count, for use next
//! to a JSONL record file.

use crate::error::OutputError;
use crate::models::CollectionReport;
use serde::Serialize;
use std::path::Path;
use tokio::fs;
use tracing::{error, info, instrument};

/// Write `report` as pretty-printed JSON to `path`, creating parent
/// directories as needed.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_report(report: &CollectionReport, path: &Path) -> Result<(), OutputError> {
    let json = serde_json::to_string_pretty(report)?;
    write_file(path, json).await?;
    info!(records = report.records.len(), "Wrote JSON report");
    Ok(())
}

#[derive(Serialize)]
struct ReportSummary<'a> {
    #[serde(flatten)]
    report: &'a CollectionReport,
    record_count: usize,
}

/// Write `report` without its records.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_summary(report: &CollectionReport, path: &Path) -> Result<(), OutputError> {
    let mut value = serde_json::to_value(ReportSummary {
        report,
        record_count: report.records.len(),
    })?;
    if let Some(object) = value.as_object_mut() {
        object.remove("records");
    }
    write_file(path, serde_json::to_string_pretty(&value)?).await?;
    info!("Wrote JSON summary");
    Ok(())
}

pub(crate) async fn write_file(
    path: &Path,
    contents: impl AsRef<[u8]>,
) -> Result<(), OutputError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = fs::create_dir_all(parent).await {
            error!(dir = %parent.display(), error = %e, "Failed to create output dir");
            return Err(OutputError::Io {
                path: parent.to_path_buf(),
                source: e,
            });
        }
    }
    fs::write(path, contents)
        .await
        .map_err(|source| OutputError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{CollectorStats, Termination};
    use crate::models::ScrapedRecord;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use std::collections::BTreeMap;

    fn report() -> CollectionReport {
        CollectionReport {
            profile: "bbc_search".to_string(),
            query: Some("generative ai".to_string()),
            started_at: "2025-05-06T14:30:00Z".to_string(),
            finished_at: "2025-05-06T14:30:42Z".to_string(),
            termination: Some(Termination::Exhausted),
            error: None,
            stats: CollectorStats {
                cycles: 2,
                advances: 1,
                collected: 1,
                ..CollectorStats::default()
            },
            records: vec![ScrapedRecord {
                source: "https://www.bbc.co.uk/search?q=generative+ai&page=1".to_string(),
                page: 0,
                fields: BTreeMap::from([
                    ("title".to_string(), "AI and the newsroom".to_string()),
                    ("url".to_string(), "https://www.bbc.co.uk/news/articles/c1".to_string()),
                ]),
            }],
        }
    }

    #[tokio::test]
    async fn test_write_report_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/run.json");
        write_report(&report(), &path).await.unwrap();

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["termination"], json!("exhausted"));
        assert_eq!(written["stats"]["advances"], json!(1));
        assert_eq!(
            written["records"][0],
            json!({
                "source": "https://www.bbc.co.uk/search?q=generative+ai&page=1",
                "page": 0,
                "title": "AI and the newsroom",
                "url": "https://www.bbc.co.uk/news/articles/c1",
            })
        );
    }

    #[tokio::test]
    async fn test_write_summary_drops_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        write_summary(&report(), &path).await.unwrap();

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(written.get("records").is_none());
        assert_eq!(written["record_count"], json!(1));
        assert_eq!(written["profile"], json!("bbc_search"));
    }
}
