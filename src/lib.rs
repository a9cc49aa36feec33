//! Streaming ingest of a marketplace product feed into an upsert-by-key table.
//!
//! Flow: [`feed`] opens and decodes the document, [`aggregate`] folds listings
//! into one item per catalog variant, [`writer`] upserts the items in chunks
//! through a [`store::UpsertStore`]. [`pipeline`] wires the stages together.

pub mod aggregate;
pub mod config;
pub mod feed;
pub mod normalization;
pub mod pipeline;
pub mod record;
pub mod store;
pub mod tracing;
pub mod writer;

pub mod util {
    pub mod db;
    pub mod env;
}

pub use aggregate::{AggregatedItem, Aggregator};
pub use config::{IngestConfig, StoreBackend};
pub use pipeline::{collect_items, run_ingest, IngestError, IngestOptions, IngestReport};
pub use record::RawProductRecord;
