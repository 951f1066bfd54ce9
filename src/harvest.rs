//! One collection run: profile + query in, report out.
//!
//! [`run_profile`] wires a [`SiteProfile`] to the HTTP stack, the matching
//! content source and mapper, and an [`IncrementalCollector`].
//! [`harvest`] wraps it with timestamps and turns both outcomes into a
//! [`CollectionReport`], so failed runs are persisted just like finished ones.

use crate::collector::{Collection, CollectorSettings, IncrementalCollector};
use crate::error::HarvestError;
use crate::fetch::{HttpFetcher, RetryFetch};
use crate::models::{CollectionReport, ScrapedRecord};
use crate::profile::{SiteProfile, SourceKind};
use crate::sources::html::HtmlPageSource;
use crate::sources::json::JsonApiSource;
use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration as StdDuration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// Collect records for one query of one profile.
///
/// `settings` replaces the profile's own `collector` block, so callers can
/// apply command-line overrides on top of it.
#[instrument(level = "info", skip_all, fields(profile = %profile.name, query = ?query))]
pub async fn run_profile(
    profile: &SiteProfile,
    query: Option<&str>,
    settings: CollectorSettings,
    cancel: CancellationToken,
) -> Result<Collection<ScrapedRecord>, HarvestError> {
    let collector = IncrementalCollector::new(settings)?.with_cancellation(cancel);

    let mut start_url = profile.start_url_for(query)?;
    let mut fetch = profile.fetch.clone();
    profile.apply_api_key(&mut start_url, &mut fetch)?;

    let fetcher = RetryFetch::new(
        HttpFetcher::new(&fetch)?,
        fetch.max_retries,
        StdDuration::from_millis(fetch.retry_base_delay_ms),
    );
    let pacing = fetch.pacing();

    let collection = match profile.kind {
        SourceKind::Html => {
            let item_selector = profile.item_selector.as_deref().unwrap_or_default();
            let mut source = HtmlPageSource::new(
                fetcher,
                start_url,
                item_selector,
                &profile.pagination,
                pacing,
            )?;
            let mapper = profile.html_mapper()?;
            collector.collect(&mut source, &mapper).await?
        }
        SourceKind::Json => {
            let items_pointer = profile.items_pointer.as_deref().unwrap_or_default();
            let mut source = JsonApiSource::new(
                fetcher,
                start_url,
                items_pointer,
                &profile.pagination,
                pacing,
            )?;
            let mapper = profile.json_mapper()?;
            collector.collect(&mut source, &mapper).await?
        }
    };
    Ok(collection)
}

/// Run one query and describe the outcome as a [`CollectionReport`].
pub async fn harvest(
    profile: &SiteProfile,
    query: Option<&str>,
    settings: CollectorSettings,
    cancel: CancellationToken,
) -> CollectionReport {
    let started_at = Utc::now();
    let result = run_profile(profile, query, settings, cancel).await;
    let report = build_report(&profile.name, query, started_at, Utc::now(), result);

    match (&report.termination, &report.error) {
        (Some(termination), _) => info!(
            profile = %report.profile,
            query = ?report.query,
            records = report.records.len(),
            %termination,
            "Run finished"
        ),
        (None, Some(e)) => error!(
            profile = %report.profile,
            query = ?report.query,
            partial_records = report.records.len(),
            error = %e,
            "Run failed"
        ),
        (None, None) => {}
    }
    report
}

/// Fold a run result into the report written to disk.
pub fn build_report(
    profile: &str,
    query: Option<&str>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    result: Result<Collection<ScrapedRecord>, HarvestError>,
) -> CollectionReport {
    let (termination, error, stats, records) = match result {
        Ok(collection) => (
            Some(collection.termination),
            None,
            collection.stats,
            collection.records,
        ),
        Err(e) => {
            let message = e.to_string();
            let stats = e.stats().unwrap_or_default();
            let records = match e {
                HarvestError::Collection(e) => e.into_records(),
                _ => Vec::new(),
            };
            (None, Some(message), stats, records)
        }
    };

    CollectionReport {
        profile: profile.to_string(),
        query: query.map(str::to_string),
        started_at: started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        finished_at: finished_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        termination,
        error,
        stats,
        records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{CollectorStats, Termination};
    use crate::error::{CollectionError, FetchError, Phase, ProfileError, SourceError};
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn record(title: &str) -> ScrapedRecord {
        ScrapedRecord {
            source: "https://www.bbc.co.uk/search?q=ai&page=1".to_string(),
            page: 0,
            fields: BTreeMap::from([("title".to_string(), title.to_string())]),
        }
    }

    fn times() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2025, 5, 6, 14, 30, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 5, 6, 14, 31, 5).unwrap(),
        )
    }

    #[test]
    fn test_report_from_finished_run() {
        let (start, end) = times();
        let collection = Collection {
            records: vec![record("a"), record("b")],
            termination: Termination::Stalled,
            stats: CollectorStats {
                cycles: 4,
                collected: 2,
                ..CollectorStats::default()
            },
        };
        let report = build_report("bbc_search", Some("ai"), start, end, Ok(collection));

        assert!(!report.is_failure());
        assert_eq!(report.termination, Some(Termination::Stalled));
        assert_eq!(report.started_at, "2025-05-06T14:30:00Z");
        assert_eq!(report.finished_at, "2025-05-06T14:31:05Z");
        assert_eq!(report.stats.cycles, 4);
        assert_eq!(report.records.len(), 2);
    }

    #[test]
    fn test_report_from_aborted_run_keeps_partial_records() {
        let (start, end) = times();
        let err = HarvestError::Collection(CollectionError {
            phase: Phase::Advance,
            cause: SourceError::Fetch(FetchError::Status {
                url: "https://www.bbc.co.uk/search?q=ai&page=2".to_string(),
                status: 503,
            }),
            records: vec![record("a")],
            stats: CollectorStats {
                collected: 1,
                ..CollectorStats::default()
            },
        });
        assert_eq!(err.partial_records().len(), 1);

        let report = build_report("bbc_search", Some("ai"), start, end, Err(err));
        assert!(report.is_failure());
        assert_eq!(report.termination, None);
        assert!(report.error.as_deref().unwrap().contains("HTTP 503"));
        assert_eq!(report.stats.collected, 1);
        assert_eq!(report.records, vec![record("a")]);
    }

    #[test]
    fn test_report_from_setup_failure_is_empty() {
        let (start, end) = times();
        let err = HarvestError::Profile(ProfileError::MissingApiKey(
            "SERPSTACK_ACCESS_KEY".to_string(),
        ));
        assert!(err.partial_records().is_empty());

        let report = build_report("serpstack_news", None, start, end, Err(err));
        assert!(report.is_failure());
        assert!(report.records.is_empty());
        assert_eq!(report.stats, CollectorStats::default());
    }
}
