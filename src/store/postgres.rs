//! Direct Postgres store: multi-row `INSERT .. ON CONFLICT DO UPDATE` statements,
//! one transaction per call.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use tracing::{debug, instrument};

use super::{validate_identifier, MarketRow, UpsertStore, MARKET_COLUMNS};
use crate::util::db::Db;

/// Postgres accepts at most this many bind parameters in one statement.
pub const PG_BIND_LIMIT: usize = u16::MAX as usize;

/// Rows per `INSERT` so that one statement stays under [`PG_BIND_LIMIT`].
pub const MAX_ROWS_PER_STATEMENT: usize = PG_BIND_LIMIT / MARKET_COLUMNS.len();

pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

/// Build the upsert statement for `rows`. Every non-key column is overwritten
/// from `EXCLUDED`, so re-sending a row replaces the stored snapshot.
fn upsert_query<'a>(
    table: &str,
    rows: &'a [MarketRow],
    conflict_key: &str,
) -> Result<QueryBuilder<'a, Postgres>> {
    validate_identifier(table)?;
    validate_identifier(conflict_key)?;

    let mut qb: QueryBuilder<'a, Postgres> = QueryBuilder::new(format!(
        "INSERT INTO {table} ({}) ",
        MARKET_COLUMNS.join(", ")
    ));
    qb.push_values(rows, |mut b, r| {
        b.push_bind(&r.item_key)
            .push_bind(&r.name_base)
            .push_bind(r.stattrak)
            .push_bind(r.souvenir)
            .push_bind(&r.condition)
            .push_bind(&r.price_whitemarket)
            .push_bind(r.qty_whitemarket)
            .push_bind(r.fetched_at);
    });
    let updates: Vec<String> = MARKET_COLUMNS
        .iter()
        .filter(|c| **c != conflict_key)
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .collect();
    qb.push(format!(
        " ON CONFLICT ({conflict_key}) DO UPDATE SET {}",
        updates.join(", ")
    ));
    Ok(qb)
}

#[async_trait]
impl UpsertStore for PgStore {
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn upsert(&self, table: &str, rows: &[MarketRow], conflict_key: &str) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        // Large chunks become several statements in one transaction, so the
        // chunk still commits or fails as a whole.
        let mut tx = self.db.pool.begin().await.context("starting upsert transaction")?;
        let mut affected = 0;
        for slice in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut qb = upsert_query(table, slice, conflict_key)?;
            let done = qb
                .build()
                .persistent(false)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("upsert into {table}"))?;
            affected += done.rows_affected();
        }
        tx.commit().await.with_context(|| format!("committing upsert into {table}"))?;
        debug!(target: "writer", affected, "postgres upsert ok");
        Ok(affected)
    }

    async fn check_table(&self, table: &str) -> Result<()> {
        validate_identifier(table)?;
        let rows: i64 = sqlx::query_scalar(&format!("SELECT count(*) FROM {table}"))
            .persistent(false)
            .fetch_one(&self.db.pool)
            .await
            .with_context(|| format!("reading {table}"))?;
        debug!(target: "writer", table, rows, "postgres table readable");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
