//! # awful_harvest
//!
//! Collects records from one or more site profiles for one or more search
//! queries and writes a report per profile and query.
//!
//! ## Usage
//!
//! ```sh
//! awful_harvest -p profiles/ebay_search.yaml -o ./out -q "thinkpad x1"
//! ```
//!
//! ## Flow
//!
//! 1. **Setup**: parse the CLI, load every profile, probe the output directory
//! 2. **Collect**: run each profile and query pair (`--concurrency` at a time)
//! 3. **Output**: persist each report, partial ones included
//!
//! Ctrl-C cancels all runs cooperatively; whatever was collected so far is
//! still written. The process exits non-zero if any run or write failed.

use awful_harvest::cli::Cli;
use awful_harvest::harvest::harvest;
use awful_harvest::outputs::persist;
use awful_harvest::profile::SiteProfile;
use awful_harvest::utils::ensure_writable_dir;
use clap::Parser;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use std::error::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("awful_harvest starting up");

    let args = Cli::parse();
    debug!(
        ?args.profiles,
        ?args.output_dir,
        queries = args.queries.len(),
        "Parsed CLI arguments"
    );

    let mut profiles = Vec::with_capacity(args.profiles.len());
    for path in &args.profiles {
        let profile = SiteProfile::load(path).await.map_err(|e| {
            error!(path = %path.display(), error = %e, "Could not load site profile");
            e
        })?;
        profiles.push(profile);
    }

    // Early check: fail before any scraping if results could not be saved
    if let Err(e) = ensure_writable_dir(&args.output_dir).await {
        error!(
            path = %args.output_dir.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e.into());
    }

    let profiles: Vec<_> = profiles
        .into_iter()
        .map(|profile| {
            let settings = args.collector_settings(profile.collector);
            info!(
                profile = %profile.name,
                target = ?settings.target_count,
                max_advances = settings.max_advances,
                stall_limit = settings.stall_limit,
                "Collector settings"
            );
            (profile, settings)
        })
        .collect();

    // ---- Cancellation on Ctrl-C ----
    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing current cycles and saving partial results");
            ctrl_c_token.cancel();
        }
    });

    // ---- Run every profile x query pair concurrently ----
    let queries = args.query_list();
    let runs: Vec<_> = profiles
        .iter()
        .cartesian_product(queries.iter())
        .collect();
    let concurrency = args.concurrency.max(1);
    info!(
        profiles = profiles.len(),
        runs = runs.len(),
        concurrency,
        "Starting collection runs"
    );

    let outcomes: Vec<bool> = stream::iter(runs)
        .map(|((profile, settings), query)| {
            let settings = *settings;
            let cancel = cancel.clone();
            let output_dir = &args.output_dir;
            let format = args.format;
            async move {
                let report = harvest(profile, query.as_deref(), settings, cancel).await;
                let failed = report.is_failure();
                match persist(&report, output_dir, format).await {
                    Ok(path) => {
                        info!(
                            path = %path.display(),
                            records = report.records.len(),
                            partial = failed,
                            "Saved report"
                        );
                        !failed
                    }
                    Err(e) => {
                        error!(
                            profile = %profile.name,
                            query = ?query,
                            error = %e,
                            "Failed to save report"
                        );
                        false
                    }
                }
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let failed = outcomes.iter().filter(|ok| !**ok).count();
    let elapsed = start_time.elapsed();
    info!(
        elapsed_secs = elapsed.as_secs_f64(),
        runs = outcomes.len(),
        failed,
        "awful_harvest finished"
    );

    if failed > 0 {
        return Err(format!("{failed} of {} runs failed", outcomes.len()).into());
    }
    Ok(())
}
