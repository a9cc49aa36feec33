//! One ingest run: stream the feed, aggregate, write in batches.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::aggregate::{AggregatedItem, Aggregator};
use crate::feed::{FeedError, FeedItems, FeedSource};
use crate::store::{MarketRow, UpsertStore};
use crate::writer::{BatchWriteError, BatchWriter};

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub table: String,
    pub batch_size: usize,
}

/// Counters for one run, logged at the end and returned to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Feed shape that produced records, `None` if the feed was empty.
    pub shape: Option<String>,
    pub records_seen: u64,
    pub records_skipped: u64,
    /// The document broke off before its item array closed. Records read before
    /// the break were kept.
    pub truncated: bool,
    pub unroutable: u64,
    pub groups: u64,
    pub items: usize,
    pub chunks: usize,
    pub rows_written: u64,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Write(#[from] BatchWriteError),
    #[error("ingest cancelled while reading the feed after {records} records")]
    Cancelled { records: u64 },
}

impl IngestError {
    /// Rows confirmed by the store before the run stopped.
    pub fn rows_written(&self) -> u64 {
        match self {
            Self::Write(err) => err.rows_written(),
            _ => 0,
        }
    }
}

/// Read the whole feed and reduce it to aggregated items, without writing anything.
#[instrument(skip_all, fields(source = %source.describe()))]
pub async fn collect_items(
    source: &dyn FeedSource,
    fetched_at: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<(Vec<AggregatedItem>, IngestReport), IngestError> {
    let mut records = FeedItems::new(source);
    let mut aggregator = Aggregator::new(fetched_at);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            next = records.next() => Some(next?),
        };
        let Some(next) = next else {
            warn!(records = records.yielded(), "cancelled while reading feed");
            return Err(IngestError::Cancelled {
                records: records.yielded(),
            });
        };
        let Some(record) = next else { break };
        aggregator.push(&record);
    }

    let stats = aggregator.stats();
    let items = aggregator.finish();
    let report = IngestReport {
        shape: records.shape().map(|s| s.to_string()),
        records_seen: stats.records,
        records_skipped: records.skipped(),
        truncated: records.truncated(),
        unroutable: stats.unroutable,
        groups: stats.groups,
        items: items.len(),
        ..IngestReport::default()
    };
    Ok((items, report))
}

/// Full run. A failure after some chunks were written leaves those rows in
/// place; the error reports how many.
#[instrument(skip_all, fields(table = %opts.table, store = store.name()))]
pub async fn run_ingest(
    source: &dyn FeedSource,
    store: &dyn UpsertStore,
    opts: &IngestOptions,
    fetched_at: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<IngestReport, IngestError> {
    let (items, mut report) = collect_items(source, fetched_at, cancel).await?;
    if items.is_empty() {
        warn!(records = report.records_seen, "feed produced no items; nothing to write");
        return Ok(report);
    }

    let rows: Vec<MarketRow> = items.iter().map(MarketRow::from).collect();
    drop(items);
    let summary = BatchWriter::new(store, opts.table.clone(), opts.batch_size)
        .write_all(&rows, cancel)
        .await?;
    report.chunks = summary.chunks;
    report.rows_written = summary.rows_written;

    info!(
        shape = report.shape.as_deref().unwrap_or("-"),
        records = report.records_seen,
        skipped = report.records_skipped,
        truncated = report.truncated,
        unroutable = report.unroutable,
        items = report.items,
        rows_written = report.rows_written,
        "ingest finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::source::tests::gzip;
    use crate::feed::StaticFeedSource;
    use crate::store::testing::MemoryStore;
    use bigdecimal::BigDecimal;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn opts(batch_size: usize) -> IngestOptions {
        IngestOptions {
            table: "market_data".into(),
            batch_size,
        }
    }

    fn run_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap()
    }

    const FEED: &str = r#"{"products": [
      {"class_id": "A", "market_hash_name": "StatTrak™ Widget (Field-Tested)", "price": "10.00"},
      {"class_id": "A", "market_hash_name": "StatTrak™ Widget (Field-Tested)", "price": "9.00"},
      {"class_id": "B", "market_hash_name": "Souvenir Gadget (Factory New)", "price_cents": 1999},
      {"price": "1.00"}
    ]}"#;

    #[tokio::test]
    async fn feed_is_aggregated_and_written() {
        let store = MemoryStore::default();
        let report = run_ingest(
            &StaticFeedSource::new(FEED),
            &store,
            &opts(500),
            run_at(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.shape.as_deref(), Some("products"));
        assert_eq!(report.records_seen, 4);
        assert_eq!(report.unroutable, 1);
        assert_eq!(report.items, 2);
        assert_eq!(report.rows_written, 2);
        assert_eq!(report.chunks, 1);

        let rows = store.snapshot();
        let widget = &rows[0];
        assert_eq!(widget.item_key, "Widget|StatTrak|Field-Tested");
        assert_eq!(widget.name_base, "Widget");
        assert!(widget.stattrak);
        assert!(!widget.souvenir);
        assert_eq!(widget.condition.as_deref(), Some("Field-Tested"));
        assert_eq!(widget.price_whitemarket, Some(BigDecimal::from_str("10.00").unwrap()));
        assert_eq!(widget.qty_whitemarket, 2);
        assert_eq!(widget.fetched_at, run_at());

        let gadget = &rows[1];
        assert_eq!(gadget.item_key, "Gadget|Souvenir|Factory New");
        assert_eq!(gadget.price_whitemarket, Some(BigDecimal::from_str("19.99").unwrap()));
    }

    #[tokio::test]
    async fn rerunning_the_same_feed_is_idempotent() {
        let store = MemoryStore::default();
        let source = StaticFeedSource::new(FEED);
        let cancel = CancellationToken::new();
        run_ingest(&source, &store, &opts(1), run_at(), &cancel).await.unwrap();
        let first = store.snapshot();
        run_ingest(&source, &store, &opts(1), run_at(), &cancel).await.unwrap();
        assert_eq!(store.snapshot(), first);
        assert_eq!(store.call_sizes(), vec![1, 1, 1, 1]);
    }

    #[tokio::test]
    async fn gzip_ndjson_feed_is_accepted() {
        let ndjson = b"{\"classid\": 7, \"name\": \"Gizmo (Battle-Scarred)\", \"price\": \"0,5\"}\n\
                       not json\n\
                       {\"classid\": 7, \"name\": \"Gizmo (Battle-Scarred)\"}\n";
        let store = MemoryStore::default();
        let report = run_ingest(
            &StaticFeedSource::new(gzip(ndjson).await),
            &store,
            &opts(500),
            run_at(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(report.shape.as_deref(), Some("ndjson"));
        assert_eq!(report.records_seen, 2);
        assert_eq!(report.records_skipped, 1);
        let rows = store.snapshot();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].item_key, "Gizmo|Battle-Scarred");
        assert_eq!(rows[0].qty_whitemarket, 2);
        assert_eq!(rows[0].price_whitemarket, Some(BigDecimal::from_str("0.5").unwrap()));
    }

    #[tokio::test]
    async fn empty_feed_writes_nothing() {
        let store = MemoryStore::default();
        let report = run_ingest(
            &StaticFeedSource::new("[]"),
            &store,
            &opts(500),
            run_at(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(report.items, 0);
        assert_eq!(report.rows_written, 0);
        assert!(store.call_sizes().is_empty());
    }

    #[tokio::test]
    async fn partial_write_is_reported() {
        let store = MemoryStore::failing_on(1);
        let err = run_ingest(
            &StaticFeedSource::new(FEED),
            &store,
            &opts(1),
            run_at(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            IngestError::Write(BatchWriteError::ChunkFailed { chunk_index: 1, .. })
        ));
        assert_eq!(err.rows_written(), 1);
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_before_writing() {
        let store = MemoryStore::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run_ingest(&StaticFeedSource::new(FEED), &store, &opts(500), run_at(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Cancelled { records: 0 }));
        assert!(store.call_sizes().is_empty());
    }

    #[tokio::test]
    async fn truncated_feed_still_writes_complete_records() {
        let feed = r#"[
            {"class_id": "A", "market_hash_name": "Widget (Factory New)", "price": "1.00"},
            {"class_id": "B", "market_hash_name": "Gadget (Well-Worn)", "price": "2.00"},
            {"class_id": "C", "na"#;
        let store = MemoryStore::default();
        let report = run_ingest(
            &StaticFeedSource::new(feed),
            &store,
            &opts(500),
            run_at(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(report.truncated);
        assert_eq!(report.records_seen, 2);
        assert_eq!(report.rows_written, 2);
        let keys: Vec<String> = store.snapshot().into_iter().map(|r| r.item_key).collect();
        assert_eq!(keys, vec!["Widget|Factory New", "Gadget|Well-Worn"]);
    }

    #[tokio::test]
    async fn collect_items_does_not_write() {
        let (items, report) = collect_items(
            &StaticFeedSource::new(FEED),
            run_at(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].display_name, "StatTrak™ Widget (Field-Tested)");
        assert_eq!(report.rows_written, 0);
    }
}
