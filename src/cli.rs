//! Command-line interface definitions for awful_harvest.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Most arguments can also be provided via environment variables.

use crate::collector::CollectorSettings;
use crate::outputs::OutputFormat;
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for awful_harvest.
///
/// Every profile is run once per `--query` (or once without a query when
/// none is given). The collector overrides replace the matching values of
/// each profile's `collector` block.
///
/// # Examples
///
/// ```sh
/// # eBay listings for two searches, 100 records each
/// awful_harvest -p profiles/ebay_search.yaml -o ./out \
///     -q "thinkpad x1" -q "framework 13" --target-count 100
///
/// # Everything on the CNN Lite front page, as JSON lines
/// awful_harvest -p profiles/cnn_lite.yaml -o ./out --format jsonl
///
/// # The same search on two news sites, as CSV
/// awful_harvest -p profiles/bbc_search.yaml -p profiles/serpstack_news.yaml \
///     -o ./out -q "generative ai" --format csv
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Site profile (YAML); repeat to run several sites
    #[arg(short = 'p', long = "profile", required = true)]
    pub profiles: Vec<PathBuf>,

    /// Directory the reports are written to
    #[arg(short, long, env = "HARVEST_OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Search query; repeat for several runs
    #[arg(short, long = "query")]
    pub queries: Vec<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Stop each run after this many unique records
    #[arg(long, conflicts_with = "unbounded")]
    pub target_count: Option<usize>,

    /// Collect until the source stalls or is exhausted
    #[arg(long)]
    pub unbounded: bool,

    /// Upper bound on page advances per run
    #[arg(long)]
    pub max_advances: Option<usize>,

    /// Consecutive cycles without new records before a run gives up
    #[arg(long)]
    pub stall_limit: Option<usize>,

    /// Runs (profile and query pairs) collected at the same time
    #[arg(short, long, env = "HARVEST_CONCURRENCY", default_value_t = 2)]
    pub concurrency: usize,
}

impl Cli {
    /// Profile defaults with the command-line overrides applied.
    pub fn collector_settings(&self, profile: CollectorSettings) -> CollectorSettings {
        let mut settings = profile;
        if self.unbounded {
            settings.target_count = None;
        } else if let Some(target) = self.target_count {
            settings.target_count = Some(target);
        }
        if let Some(max_advances) = self.max_advances {
            settings.max_advances = max_advances;
        }
        if let Some(stall_limit) = self.stall_limit {
            settings.stall_limit = stall_limit;
        }
        settings
    }

    /// Queries to run; a single `None` when no query was given.
    pub fn query_list(&self) -> Vec<Option<String>> {
        if self.queries.is_empty() {
            vec![None]
        } else {
            self.queries.iter().cloned().map(Some).collect()
        }
    }
}
