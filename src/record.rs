use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One listing exactly as the feed delivered it.
///
/// The feed has no stable schema, so fields stay untyped until a consumer asks
/// for them by one of several candidate names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawProductRecord(Map<String, Value>);

impl RawProductRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// First candidate field usable as an identifier: a non-blank string or a number.
    pub fn first_text(&self, fields: &[&str]) -> Option<String> {
        fields.iter().find_map(|field| match self.0.get(*field)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }
}

impl From<Map<String, Value>> for RawProductRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(v: Value) -> RawProductRecord {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn first_text_skips_blank_and_null_candidates() {
        let r = record(json!({"class_id": "", "classid": null, "productClassId": 42}));
        assert_eq!(
            r.first_text(&["class_id", "classid", "productClassId"]).as_deref(),
            Some("42")
        );
    }

    #[test]
    fn first_text_ignores_structured_values() {
        let r = record(json!({"name": {"en": "x"}, "hash_name": true}));
        assert_eq!(r.first_text(&["name", "hash_name"]), None);
    }
}
