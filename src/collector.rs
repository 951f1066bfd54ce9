//! Incremental paginated collection with deduplication and stall detection.
//!
//! [`IncrementalCollector`] owns the control loop every scraper needs: look at
//! what the source currently shows, keep the items it has not seen before,
//! ask the source for more, and stop for a well-defined reason. The source
//! (a paged HTTP client, a browser session) and the per-site field mapping
//! are plugged in through [`ContentSource`] and [`ItemMapper`].
//!
//! # Cycle
//!
//! 1. Read all current candidates and fingerprint them.
//! 2. Admit every fingerprint not seen earlier in the run and map it to a
//!    record. A fingerprinted item counts as seen even if mapping fails, so a
//!    broken item is never retried.
//! 3. Stop when the target is reached, after `stall_limit` cycles without a
//!    new record, on cancellation, after `max_advances` advances, or when the
//!    source reports it cannot advance.
//!
//! Every cycle either returns or performs one more advance, so a run never
//! makes more than `max_advances` advance calls.

use crate::error::{CollectionError, ExtractionError, Phase, SettingsError, SourceError};
use crate::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// A stateful content source driven one step at a time.
///
/// Implementations own whatever cursor they advance (scroll position, page
/// number, next-link) and must only return from [`advance`](Self::advance)
/// once the new content is ready to be read.
pub trait ContentSource {
    /// Opaque handle to one raw element.
    type Item;

    /// Everything currently visible, not only what is new since the last call.
    async fn candidates(&mut self) -> Result<Vec<Self::Item>, SourceError>;

    /// Load more content. `Ok(false)` means the source is exhausted.
    async fn advance(&mut self) -> Result<bool, SourceError>;
}

/// Per-site fingerprinting and field mapping for one item type.
pub trait ItemMapper<I> {
    /// Output shape. The collector never looks inside it.
    type Record;

    fn fingerprint(&self, item: &I) -> Result<Fingerprint, ExtractionError>;

    fn map(&self, item: &I) -> Result<Self::Record, ExtractionError>;
}

/// Tunable bounds for a collection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CollectorSettings {
    /// Stop once this many unique records are collected. `None` is unbounded.
    pub target_count: Option<usize>,
    /// Ceiling on advance calls.
    pub max_advances: usize,
    /// Consecutive cycles without a new record before giving up.
    pub stall_limit: usize,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            target_count: Some(100),
            max_advances: 50,
            stall_limit: 3,
        }
    }
}

impl CollectorSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.stall_limit == 0 {
            return Err(SettingsError::ZeroStallLimit);
        }
        if self.target_count == Some(0) {
            return Err(SettingsError::ZeroTarget);
        }
        Ok(())
    }

    fn target_reached(&self, collected: usize) -> bool {
        self.target_count.is_some_and(|target| collected >= target)
    }
}

/// Why a run stopped without a source failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Collected `target_count` records.
    TargetReached,
    /// `stall_limit` consecutive cycles produced nothing new.
    Stalled,
    /// Hit the `max_advances` safety bound.
    AdvanceLimit,
    /// The source had nothing further to load.
    Exhausted,
    /// The caller cancelled the run.
    Cancelled,
}

impl Termination {
    /// Only reaching the target counts as a complete run; everything else is
    /// a partial (but successful) result.
    pub fn is_complete(self) -> bool {
        self == Termination::TargetReached
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Termination::TargetReached => "target reached",
            Termination::Stalled => "stalled",
            Termination::AdvanceLimit => "advance limit reached",
            Termination::Exhausted => "source exhausted",
            Termination::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Counters describing a finished (or aborted) run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectorStats {
    /// Candidate reads performed.
    pub cycles: usize,
    /// Successful advance calls.
    pub advances: usize,
    /// Records emitted.
    pub collected: usize,
    /// Fingerprinted items whose mapping failed.
    pub skipped: usize,
    /// Candidates that could not be fingerprinted at all.
    pub unfingerprintable: usize,
    /// Stall counter at the moment the run ended.
    pub consecutive_stalls: usize,
    /// Distinct fingerprints recorded; always `collected + skipped`.
    pub seen: usize,
}

/// Successful outcome of [`IncrementalCollector::collect`].
#[derive(Debug)]
pub struct Collection<R> {
    /// Records in first-seen order.
    pub records: Vec<R>,
    pub termination: Termination,
    pub stats: CollectorStats,
}

impl<R> Collection<R> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.termination.is_complete()
    }
}

/// Mutable bookkeeping for a single run. Never outlives `collect`.
#[derive(Default)]
struct CollectorState {
    seen: HashSet<Fingerprint>,
    stats: CollectorStats,
}

impl CollectorState {
    /// Copy the seen-set size into the stats. Every admitted fingerprint
    /// either became a record or was skipped.
    fn close_stats(&mut self) {
        self.stats.seen = self.seen.len();
        debug_assert_eq!(self.stats.seen, self.stats.collected + self.stats.skipped);
    }

    fn finish<R>(mut self, records: Vec<R>, termination: Termination) -> Collection<R> {
        self.close_stats();
        info!(
            %termination,
            collected = self.stats.collected,
            skipped = self.stats.skipped,
            cycles = self.stats.cycles,
            advances = self.stats.advances,
            "Collection finished"
        );
        Collection {
            records,
            termination,
            stats: self.stats,
        }
    }

    fn fail<R>(mut self, records: Vec<R>, phase: Phase, cause: SourceError) -> CollectionError<R> {
        self.close_stats();
        warn!(
            %phase,
            error = %cause,
            collected = self.stats.collected,
            cycles = self.stats.cycles,
            "Collection aborted by source failure"
        );
        CollectionError {
            phase,
            cause,
            records,
            stats: self.stats,
        }
    }
}

/// Drives a [`ContentSource`] until one of the stop conditions holds.
#[derive(Debug, Clone)]
pub struct IncrementalCollector {
    settings: CollectorSettings,
    cancel: CancellationToken,
}

impl IncrementalCollector {
    pub fn new(settings: CollectorSettings) -> Result<Self, SettingsError> {
        settings.validate()?;
        Ok(Self {
            settings,
            cancel: CancellationToken::new(),
        })
    }

    /// Use `token` for cooperative cancellation. It is checked once per
    /// cycle, before advancing, so the source is never left mid-transition.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    /// Run one collection against `source`.
    ///
    /// Returns the records in first-seen order along with why the run
    /// stopped. A source failure aborts the run with a [`CollectionError`]
    /// that still carries everything collected so far.
    #[instrument(
        level = "info",
        skip_all,
        fields(
            target = ?self.settings.target_count,
            max_advances = self.settings.max_advances,
            stall_limit = self.settings.stall_limit,
        )
    )]
    pub async fn collect<S, M>(
        &self,
        source: &mut S,
        mapper: &M,
    ) -> Result<Collection<M::Record>, CollectionError<M::Record>>
    where
        S: ContentSource,
        M: ItemMapper<S::Item>,
    {
        let mut state = CollectorState::default();
        let mut records = Vec::new();

        loop {
            state.stats.cycles += 1;
            let cycle = state.stats.cycles;

            let items = match source.candidates().await {
                Ok(items) => items,
                Err(e) => return Err(state.fail(records, Phase::Candidates, e)),
            };

            let before = state.stats.collected;
            for (index, item) in items.iter().enumerate() {
                if self.settings.target_reached(state.stats.collected) {
                    break;
                }

                let fingerprint = match mapper.fingerprint(item) {
                    Ok(fp) => fp,
                    Err(e) => {
                        state.stats.unfingerprintable += 1;
                        warn!(cycle, index, error = %e, "Skipping candidate without fingerprint");
                        continue;
                    }
                };

                let short = fingerprint.short();
                if !state.seen.insert(fingerprint) {
                    continue;
                }

                match mapper.map(item) {
                    Ok(record) => {
                        records.push(record);
                        state.stats.collected += 1;
                    }
                    Err(e) => {
                        state.stats.skipped += 1;
                        warn!(
                            cycle,
                            index,
                            fingerprint = %short,
                            error = %e,
                            "Skipping unmappable candidate"
                        );
                    }
                }
            }
            let added = state.stats.collected - before;
            debug!(
                cycle,
                candidates = items.len(),
                added,
                collected = state.stats.collected,
                "Processed candidates"
            );

            if self.settings.target_reached(state.stats.collected) {
                return Ok(state.finish(records, Termination::TargetReached));
            }

            if added == 0 {
                state.stats.consecutive_stalls += 1;
            } else {
                state.stats.consecutive_stalls = 0;
            }
            if state.stats.consecutive_stalls >= self.settings.stall_limit {
                return Ok(state.finish(records, Termination::Stalled));
            }

            if self.cancel.is_cancelled() {
                return Ok(state.finish(records, Termination::Cancelled));
            }

            if state.stats.advances >= self.settings.max_advances {
                return Ok(state.finish(records, Termination::AdvanceLimit));
            }

            match source.advance().await {
                Ok(true) => state.stats.advances += 1,
                Ok(false) => return Ok(state.finish(records, Termination::Exhausted)),
                Err(e) => return Err(state.fail(records, Phase::Advance, e)),
            }
        }
    }
}
