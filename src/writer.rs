//! Chunked upsert of market rows into the destination store.

use std::error::Error as StdError;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::store::{MarketRow, UpsertStore, CONFLICT_KEY};

pub const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Debug, Error)]
pub enum BatchWriteError {
    #[error(
        "upsert of chunk {chunk_index} ({chunk_rows} rows) into {table} failed; \
         {rows_written} rows were written before it: {source}"
    )]
    ChunkFailed {
        table: String,
        chunk_index: usize,
        chunk_rows: usize,
        rows_written: u64,
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("write cancelled after {rows_written} rows")]
    Cancelled { rows_written: u64 },
}

impl BatchWriteError {
    /// Rows confirmed by the store before the failure.
    pub fn rows_written(&self) -> u64 {
        match self {
            Self::ChunkFailed { rows_written, .. } | Self::Cancelled { rows_written } => {
                *rows_written
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub chunks: usize,
    pub rows_written: u64,
}

pub struct BatchWriter<'a> {
    store: &'a dyn UpsertStore,
    table: String,
    batch_size: usize,
}

impl<'a> BatchWriter<'a> {
    pub fn new(store: &'a dyn UpsertStore, table: impl Into<String>, batch_size: usize) -> Self {
        Self {
            store,
            table: table.into(),
            batch_size: batch_size.max(1),
        }
    }

    /// Upsert `rows` in consecutive chunks of at most `batch_size`, in order.
    ///
    /// Stops at the first failing chunk. Chunks already acknowledged stay
    /// written; the error carries how many rows that was.
    pub async fn write_all(
        &self,
        rows: &[MarketRow],
        cancel: &CancellationToken,
    ) -> Result<WriteSummary, BatchWriteError> {
        let mut summary = WriteSummary::default();
        let total_chunks = rows.len().div_ceil(self.batch_size);

        for (chunk_index, chunk) in rows.chunks(self.batch_size).enumerate() {
            if cancel.is_cancelled() {
                warn!(
                    target: "writer",
                    rows_written = summary.rows_written,
                    remaining_chunks = total_chunks - chunk_index,
                    "write cancelled"
                );
                return Err(BatchWriteError::Cancelled {
                    rows_written: summary.rows_written,
                });
            }

            match self.store.upsert(&self.table, chunk, CONFLICT_KEY).await {
                Ok(written) => {
                    summary.chunks += 1;
                    summary.rows_written += written;
                    info!(
                        target: "writer",
                        store = self.store.name(),
                        table = %self.table,
                        chunk = chunk_index + 1,
                        of = total_chunks,
                        rows = chunk.len(),
                        "upserted chunk"
                    );
                }
                Err(err) => {
                    error!(
                        target: "writer",
                        store = self.store.name(),
                        table = %self.table,
                        chunk = chunk_index + 1,
                        of = total_chunks,
                        rows = chunk.len(),
                        rows_written = summary.rows_written,
                        error = %format!("{err:#}"),
                        "chunk upsert failed"
                    );
                    return Err(BatchWriteError::ChunkFailed {
                        table: self.table.clone(),
                        chunk_index,
                        chunk_rows: chunk.len(),
                        rows_written: summary.rows_written,
                        source: err.into(),
                    });
                }
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::MemoryStore;
    use chrono::Utc;

    fn rows(n: usize) -> Vec<MarketRow> {
        let now = Utc::now();
        (0..n)
            .map(|i| MarketRow {
                item_key: format!("item-{i}"),
                name_base: format!("item-{i}"),
                stattrak: false,
                souvenir: false,
                condition: None,
                price_whitemarket: None,
                qty_whitemarket: 1,
                fetched_at: now,
            })
            .collect()
    }

    #[tokio::test]
    async fn rows_are_split_into_ordered_chunks() {
        let store = MemoryStore::default();
        let writer = BatchWriter::new(&store, "market_data", 500);
        let summary = writer
            .write_all(&rows(1050), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(store.call_sizes(), vec![500, 500, 50]);
        assert_eq!(summary, WriteSummary { chunks: 3, rows_written: 1050 });

        let stored = store.snapshot();
        assert_eq!(stored.first().unwrap().item_key, "item-0");
        assert_eq!(stored.last().unwrap().item_key, "item-1049");
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let store = MemoryStore::default();
        let summary = BatchWriter::new(&store, "market_data", 500)
            .write_all(&[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.rows_written, 0);
        assert!(store.call_sizes().is_empty());
    }

    #[tokio::test]
    async fn failing_chunk_stops_the_write() {
        let store = MemoryStore::failing_on(1);
        let err = BatchWriter::new(&store, "market_data", 500)
            .write_all(&rows(1050), &CancellationToken::new())
            .await
            .unwrap_err();
        match &err {
            BatchWriteError::ChunkFailed {
                chunk_index,
                chunk_rows,
                rows_written,
                ..
            } => {
                assert_eq!(*chunk_index, 1);
                assert_eq!(*chunk_rows, 500);
                assert_eq!(*rows_written, 500);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.rows_written(), 500);
        assert!(err.to_string().contains("simulated store outage"));
        assert_eq!(store.call_sizes(), vec![500, 500]);
        assert_eq!(store.snapshot().len(), 500);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_next_chunk() {
        let store = MemoryStore::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = BatchWriter::new(&store, "market_data", 10)
            .write_all(&rows(25), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchWriteError::Cancelled { rows_written: 0 }));
        assert!(store.call_sizes().is_empty());
    }

    #[tokio::test]
    async fn zero_batch_size_is_clamped() {
        let store = MemoryStore::default();
        BatchWriter::new(&store, "market_data", 0)
            .write_all(&rows(3), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(store.call_sizes(), vec![1, 1, 1]);
    }
}
