//! Destination store seam: an opaque collaborator that can upsert rows by key.

pub mod postgres;
pub mod supabase;

use anyhow::{bail, Result};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregate::AggregatedItem;

pub use postgres::PgStore;
pub use supabase::SupabaseStore;

/// Conflict/merge key of the market table.
pub const CONFLICT_KEY: &str = "item_key";

/// Persisted columns, in insert order.
pub const MARKET_COLUMNS: [&str; 8] = [
    "item_key",
    "name_base",
    "stattrak",
    "souvenir",
    "condition",
    "price_whitemarket",
    "qty_whitemarket",
    "fetched_at",
];

/// Row layout of the market table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketRow {
    pub item_key: String,
    pub name_base: String,
    pub stattrak: bool,
    pub souvenir: bool,
    pub condition: Option<String>,
    pub price_whitemarket: Option<BigDecimal>,
    pub qty_whitemarket: i64,
    pub fetched_at: DateTime<Utc>,
}

impl From<&AggregatedItem> for MarketRow {
    fn from(item: &AggregatedItem) -> Self {
        Self {
            item_key: item.item_key.clone(),
            name_base: item.base_name.clone(),
            stattrak: item.is_special_variant,
            souvenir: item.is_rare_variant,
            condition: item.wear_condition.map(|w| w.label().to_string()),
            price_whitemarket: item.price.clone(),
            qty_whitemarket: i64::try_from(item.listing_count).unwrap_or(i64::MAX),
            fetched_at: item.fetched_at,
        }
    }
}

#[async_trait]
pub trait UpsertStore: Send + Sync {
    /// Insert or update `rows` in `table`, merging on `conflict_key`.
    /// Returns the number of rows the store reports as written.
    async fn upsert(&self, table: &str, rows: &[MarketRow], conflict_key: &str) -> Result<u64>;

    /// Cheap reachability check: the store answers and `table` is readable.
    async fn check_table(&self, table: &str) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Accept `table` or `schema.table` made of `[A-Za-z0-9_]`, not starting with a digit.
pub fn validate_identifier(ident: &str) -> Result<()> {
    let parts: Vec<&str> = ident.split('.').collect();
    if parts.len() > 2 {
        bail!("invalid identifier {ident:?}: too many qualifiers");
    }
    for part in parts {
        let mut chars = part.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            bail!("invalid identifier {ident:?}");
        }
    }
    Ok(())
}
