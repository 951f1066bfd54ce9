//! JSON Lines record output.

use crate::error::OutputError;
use crate::models::ScrapedRecord;
use crate::outputs::json::write_file;
use std::path::Path;
use tracing::{info, instrument};

/// Write one compact JSON object per record, newline-terminated.
///
/// An empty slice produces an empty file, so a run that found nothing still
/// leaves a trace on disk.
#[instrument(level = "info", skip_all, fields(path = %path.display(), records = records.len()))]
pub async fn write_records(records: &[ScrapedRecord], path: &Path) -> Result<(), OutputError> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    write_file(path, out).await?;
    info!("Wrote JSONL records");
    Ok(())
}
