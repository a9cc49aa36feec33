use std::str::FromStr;

use bigdecimal::BigDecimal;
use serde_json::Value;

use crate::record::RawProductRecord;

/// Unit a price field is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceUnit {
    /// Value already in whole currency units (e.g. `"10.00"`).
    Major,
    /// Value in hundredths that must be divided by 100.
    Cents,
}

#[derive(Debug, Clone)]
pub struct PriceAlias {
    pub field: &'static str,
    pub unit: PriceUnit,
}

impl PriceAlias {
    pub const fn new(field: &'static str, unit: PriceUnit) -> Self {
        Self { field, unit }
    }

    /// Alias whose unit is inferred from the field name (`*_cents` ⇒ cents).
    pub fn infer(field: &'static str) -> Self {
        let unit = if field.ends_with("_cents") {
            PriceUnit::Cents
        } else {
            PriceUnit::Major
        };
        Self::new(field, unit)
    }
}

/// Ordered list of candidate price fields.
///
/// The first alias present with a non-null value decides the price: if that
/// value cannot be parsed the price is absent, later aliases are not consulted.
#[derive(Debug, Clone, Default)]
pub struct PriceExtractor {
    aliases: Vec<PriceAlias>,
}

impl PriceExtractor {
    pub fn with_defaults() -> Self {
        ["price", "price_usd", "price_cents", "amount", "value"]
            .into_iter()
            .fold(Self::default(), |ex, field| ex.register(PriceAlias::infer(field)))
    }

    /// Append an alias; it is tried after all previously registered ones.
    pub fn register(mut self, alias: PriceAlias) -> Self {
        self.aliases.push(alias);
        self
    }

    pub fn extract(&self, record: &RawProductRecord) -> Option<BigDecimal> {
        let (alias, value) = self.aliases.iter().find_map(|alias| match record.get(alias.field) {
            None | Some(Value::Null) => None,
            Some(v) => Some((alias, v)),
        })?;
        let amount = parse_amount(value)?;
        Some(match alias.unit {
            PriceUnit::Major => amount,
            PriceUnit::Cents => amount / BigDecimal::from(100),
        })
    }
}

/// Parse a numeric or textual amount; a comma decimal separator is accepted.
pub fn parse_amount(value: &Value) -> Option<BigDecimal> {
    match value {
        Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        Value::String(s) => BigDecimal::from_str(s.trim().replace(',', ".").as_str()).ok(),
        _ => None,
    }
}
