//! CSV record output.
//!
//! The header is `source`, `page`, then every field name seen in the run in
//! sorted order. Records missing a field get an empty cell, so rows from
//! profiles with optional fields still line up.

use crate::error::OutputError;
use crate::models::ScrapedRecord;
use crate::outputs::json::write_file;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{info, instrument};

/// Write `records` as a CSV table with a header row.
///
/// An empty slice still produces the `source,page` header.
#[instrument(level = "info", skip_all, fields(path = %path.display(), records = records.len()))]
pub async fn write_records(records: &[ScrapedRecord], path: &Path) -> Result<(), OutputError> {
    let columns: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.fields.keys().map(String::as_str))
        .collect();

    let mut writer = ::csv::Writer::from_writer(Vec::new());
    writer.write_record(["source", "page"].into_iter().chain(columns.iter().copied()))?;
    for record in records {
        let page = record.page.to_string();
        let cells = columns
            .iter()
            .map(|c| record.fields.get(*c).map(String::as_str).unwrap_or_default());
        writer.write_record([record.source.as_str(), page.as_str()].into_iter().chain(cells))?;
    }
    let bytes = writer.into_inner().map_err(|e| OutputError::Io {
        path: path.to_path_buf(),
        source: e.into_error(),
    })?;

    write_file(path, bytes).await?;
    info!(columns = columns.len() + 2, "Wrote CSV records");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn record(page: usize, fields: &[(&str, &str)]) -> ScrapedRecord {
        ScrapedRecord {
            source: format!("https://bbc.test/s?q=ai&page={}", page + 1),
            page,
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[tokio::test]
    async fn test_header_is_union_of_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ai.csv");
        let records = vec![
            record(0, &[("title", "AI, and the newsroom"), ("url", "https://bbc.test/1")]),
            record(1, &[("summary", "Two \"quoted\" words"), ("title", "Chips")]),
        ];
        write_records(&records, &path).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "source,page,summary,title,url");
        assert_eq!(
            lines[1],
            r#"https://bbc.test/s?q=ai&page=1,0,,"AI, and the newsroom",https://bbc.test/1"#
        );
        assert_eq!(
            lines[2],
            r#"https://bbc.test/s?q=ai&page=2,1,"Two ""quoted"" words",Chips,"#
        );
        assert_eq!(lines.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_run_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("none.csv");
        write_records(&[], &path).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "source,page\n");
    }
}
