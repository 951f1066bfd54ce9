//! # awful_harvest
//!
//! Incremental collection of records from paginated web pages and search
//! APIs. A run reads everything a source currently shows, keeps the items it
//! has not seen before, pages forward, and stops for a well-defined reason:
//! target reached, stalled, advance limit, source exhausted, or cancelled.
//!
//! ## Layout
//!
//! - [`collector`]: the source-agnostic control loop
//! - [`sources`]: HTML page and JSON API sources
//! - [`extract`]: per-site field mapping and fingerprinting
//! - [`fetch`]: HTTP with retry, backoff, and pacing
//! - [`profile`]: YAML site profiles
//! - [`harvest`]: one profile run from URL to report
//! - [`outputs`]: JSON and JSONL report writers

pub mod cli;
pub mod collector;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod fingerprint;
pub mod harvest;
pub mod models;
pub mod outputs;
pub mod profile;
pub mod sources;
pub mod utils;

pub use collector::{
    Collection, CollectorSettings, CollectorStats, ContentSource, IncrementalCollector,
    ItemMapper, Termination,
};
pub use error::{CollectionError, ExtractionError, HarvestError, Phase, SourceError};
pub use fingerprint::Fingerprint;
pub use models::{CollectionReport, ScrapedRecord};
pub use profile::SiteProfile;
