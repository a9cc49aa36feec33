//! Streaming reduction of raw listings into one summary per catalog variant.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::info;

use crate::normalization::{
    build_display_name, build_item_key, NormalizedAttributes, PriceExtractor, WearCondition,
};
use crate::record::RawProductRecord;

pub const CLASS_ID_FIELDS: [&str; 4] =
    ["product_class_id", "class_id", "classid", "productClassId"];
pub const GROUP_NAME_FIELDS: [&str; 4] = ["name_hash", "hash_name", "market_hash_name", "name"];
pub const SAMPLE_NAME_FIELDS: [&str; 4] = ["name_hash", "market_hash_name", "hash_name", "name"];
pub const PHASE_FIELDS: [&str; 2] = ["product_phase", "phase"];

/// Summary of every listing of one catalog variant seen during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedItem {
    pub item_key: String,
    pub base_name: String,
    pub is_special_variant: bool,
    pub is_rare_variant: bool,
    pub wear_condition: Option<WearCondition>,
    pub phase: Option<String>,
    pub display_name: String,
    /// `None` means the sample carried no usable price, which is not the same as free.
    pub price: Option<BigDecimal>,
    pub listing_count: u64,
    pub fetched_at: DateTime<Utc>,
}

/// Per-group state. Representative fields come from the first record of the
/// group; later records only bump the count.
struct GroupAccumulator {
    item_key: String,
    attrs: NormalizedAttributes,
    price: Option<BigDecimal>,
    count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateStats {
    pub records: u64,
    pub unroutable: u64,
    pub groups: u64,
}

/// Owns the grouping map for a single run. Memory grows with the number of
/// distinct groups, not the number of listings.
pub struct Aggregator {
    prices: PriceExtractor,
    groups: IndexMap<String, GroupAccumulator>,
    stats: AggregateStats,
    fetched_at: DateTime<Utc>,
}

impl Aggregator {
    pub fn new(fetched_at: DateTime<Utc>) -> Self {
        Self::with_prices(PriceExtractor::with_defaults(), fetched_at)
    }

    pub fn with_prices(prices: PriceExtractor, fetched_at: DateTime<Utc>) -> Self {
        Self {
            prices,
            groups: IndexMap::new(),
            stats: AggregateStats::default(),
            fetched_at,
        }
    }

    /// Fold one record into its group. Returns `false` when the record carries no
    /// grouping identity and was dropped.
    pub fn push(&mut self, record: &RawProductRecord) -> bool {
        self.stats.records += 1;
        let Some(group_id) = grouping_identity(record) else {
            self.stats.unroutable += 1;
            return false;
        };

        if let Some(acc) = self.groups.get_mut(&group_id) {
            acc.count += 1;
            return true;
        }

        let name = record.first_text(&SAMPLE_NAME_FIELDS).unwrap_or_default();
        let phase = record.first_text(&PHASE_FIELDS);
        let attrs = NormalizedAttributes::parse(&name).with_phase(phase.as_deref());
        let acc = GroupAccumulator {
            item_key: build_item_key(&attrs),
            price: self.prices.extract(record),
            attrs,
            count: 1,
        };
        self.groups.insert(group_id, acc);
        true
    }

    pub fn stats(&self) -> AggregateStats {
        AggregateStats {
            groups: self.groups.len() as u64,
            ..self.stats
        }
    }

    /// Produce one item per item key, in first-seen order.
    ///
    /// Distinct groups that normalize to the same key are merged: counts add up
    /// and the representative fields of the earliest group are kept.
    pub fn finish(self) -> Vec<AggregatedItem> {
        let stats = self.stats();
        let mut by_key: IndexMap<String, AggregatedItem> =
            IndexMap::with_capacity(self.groups.len());
        for (_, acc) in self.groups {
            if let Some(existing) = by_key.get_mut(&acc.item_key) {
                existing.listing_count += acc.count;
                continue;
            }
            let item = AggregatedItem {
                item_key: acc.item_key.clone(),
                display_name: build_display_name(&acc.attrs),
                base_name: acc.attrs.base_name,
                is_special_variant: acc.attrs.is_special_variant,
                is_rare_variant: acc.attrs.is_rare_variant,
                wear_condition: acc.attrs.wear_condition,
                phase: acc.attrs.phase,
                price: acc.price,
                listing_count: acc.count,
                fetched_at: self.fetched_at,
            };
            by_key.insert(acc.item_key, item);
        }
        info!(
            target: "aggregate",
            records = stats.records,
            unroutable = stats.unroutable,
            groups = stats.groups,
            items = by_key.len(),
            "aggregation finished"
        );
        by_key.into_values().collect()
    }
}

/// Class id first, then a name/hash field; `None` if the record has neither.
pub fn grouping_identity(record: &RawProductRecord) -> Option<String> {
    record
        .first_text(&CLASS_ID_FIELDS)
        .or_else(|| record.first_text(&GROUP_NAME_FIELDS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use std::str::FromStr;

    fn record(v: Value) -> RawProductRecord {
        serde_json::from_value(v).unwrap()
    }

    fn run_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    fn aggregate(values: &[Value]) -> Vec<AggregatedItem> {
        let mut agg = Aggregator::new(run_at());
        for v in values {
            agg.push(&record(v.clone()));
        }
        agg.finish()
    }

    #[test]
    fn identical_listings_collapse_into_one_item() {
        let listing = json!({
            "class_id": "A",
            "market_hash_name": "StatTrak™ Widget (Field-Tested)",
            "price": "10.00"
        });
        let items = aggregate(&[listing.clone(), listing]);
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.base_name, "Widget");
        assert!(item.is_special_variant);
        assert!(!item.is_rare_variant);
        assert_eq!(item.wear_condition, Some(WearCondition::FieldTested));
        assert_eq!(item.price, Some(BigDecimal::from_str("10.00").unwrap()));
        assert_eq!(item.listing_count, 2);
        assert_eq!(item.item_key, "Widget|StatTrak|Field-Tested");
        assert_eq!(item.display_name, "StatTrak™ Widget (Field-Tested)");
        assert_eq!(item.fetched_at, run_at());
    }

    #[test]
    fn first_record_of_group_wins_for_price() {
        let items = aggregate(&[
            json!({"class_id": "A", "name": "Widget", "price": "3.00"}),
            json!({"class_id": "A", "name": "Widget", "price": "1.00"}),
        ]);
        assert_eq!(items[0].price, Some(BigDecimal::from_str("3").unwrap()));
        assert_eq!(items[0].listing_count, 2);
    }

    const REDLINE: &str = "AK-47 | Redline (Field-Tested)";
    const DOPPLER: &str = "★ Karambit | Doppler (Factory New)";

    #[test]
    fn groups_with_same_key_are_merged() {
        let items = aggregate(&[
            json!({"class_id": "1", "market_hash_name": REDLINE, "price": 5}),
            json!({"class_id": "2", "market_hash_name": REDLINE, "price": 7}),
            json!({"class_id": "2", "market_hash_name": REDLINE}),
        ]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].listing_count, 3);
        assert_eq!(items[0].price, Some(BigDecimal::from(5)));
    }

    #[test]
    fn falls_back_to_name_for_grouping() {
        let items = aggregate(&[
            json!({"market_hash_name": "Souvenir AWP | Dragon Lore (Minimal Wear)"}),
            json!({"market_hash_name": "Souvenir AWP | Dragon Lore (Minimal Wear)"}),
        ]);
        assert_eq!(items.len(), 1);
        assert!(items[0].is_rare_variant);
        assert_eq!(items[0].price, None);
        assert_eq!(items[0].listing_count, 2);
    }

    #[test]
    fn unroutable_records_are_dropped() {
        let mut agg = Aggregator::new(run_at());
        assert!(!agg.push(&record(json!({"price": "1.00"}))));
        assert!(!agg.push(&record(json!({"class_id": "", "name": null}))));
        assert!(agg.push(&record(json!({"classid": 99, "name": "Widget"}))));
        assert_eq!(
            agg.stats(),
            AggregateStats {
                records: 3,
                unroutable: 2,
                groups: 1
            }
        );
        assert_eq!(agg.finish().len(), 1);
    }

    #[test]
    fn phase_is_part_of_identity() {
        let items = aggregate(&[
            json!({"class_id": "1", "name": DOPPLER, "phase": "Ruby"}),
            json!({"class_id": "2", "name": DOPPLER, "product_phase": "Phase 2"}),
        ]);
        let keys: Vec<_> = items.iter().map(|i| i.item_key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "★ Karambit | Doppler|Factory New|Ruby",
                "★ Karambit | Doppler|Factory New|Phase 2"
            ]
        );
    }

    #[test]
    fn aggregation_is_deterministic() {
        let feed: Vec<Value> = (0..50)
            .map(|i| {
                json!({
                    "class_id": format!("c{}", i % 7),
                    "market_hash_name": format!("Item {} (Well-Worn)", i % 7),
                    "price_cents": 100 + i,
                })
            })
            .collect();
        assert_eq!(aggregate(&feed), aggregate(&feed));
    }
}
