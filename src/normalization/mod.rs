pub mod item_key;
pub mod market_name;
pub mod price;

pub use item_key::{build_display_name, build_item_key, KEY_SEPARATOR};
pub use market_name::{NormalizedAttributes, WearCondition};
pub use price::{PriceAlias, PriceExtractor, PriceUnit};
