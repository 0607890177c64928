//! Type census tallying.
//!
//! Both census modes end up here: scoped censuses tally device records in
//! memory, unscoped ones convert the `{@type, count}` rows of the census
//! pipeline. Records without events are left out in both.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{AggregationError, Result};
use crate::types::{DeviceRecord, Row};

/// Number of records per type tag.
pub type TypeCounts = BTreeMap<String, u64>;

/// Count devices by the type tag of their most recent event.
pub fn tally_devices<'a>(devices: impl IntoIterator<Item = &'a DeviceRecord>) -> TypeCounts {
    let mut counts = TypeCounts::new();
    for tag in devices.into_iter().filter_map(DeviceRecord::last_event_type) {
        *counts.entry(tag.to_string()).or_insert(0) += 1;
    }
    counts
}

#[derive(Deserialize)]
struct CensusRow {
    #[serde(rename = "@type", default)]
    type_tag: Value,
    count: u64,
}

/// Convert census pipeline rows into a [`TypeCounts`] map.
pub fn from_rows(rows: &[Row]) -> Result<TypeCounts> {
    let mut counts = TypeCounts::new();
    for (index, row) in rows.iter().enumerate() {
        let row: CensusRow = serde_json::from_value(Value::Object(row.clone())).map_err(|e| {
            AggregationError::MalformedAggregationResult(format!("census row {}: {}", index, e))
        })?;
        let tag = match row.type_tag {
            Value::Null => continue,
            Value::String(s) => s,
            other => other.to_string(),
        };
        if counts.insert(tag.clone(), row.count).is_some() {
            return Err(AggregationError::MalformedAggregationResult(format!(
                "census row {}: duplicate type '{}'",
                index, tag
            )));
        }
    }
    Ok(counts)
}

/// Keep only the entry for `event_type`, when one is requested.
pub fn restrict_to(mut counts: TypeCounts, event_type: Option<&str>) -> TypeCounts {
    if let Some(event_type) = event_type {
        counts.retain(|tag, _| tag == event_type);
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn device(id: &str, tags: &[&str]) -> DeviceRecord {
        serde_json::from_value(json!({
            "_id": id,
            "events": tags.iter().map(|t| json!({"@type": t})).collect::<Vec<_>>()
        }))
        .unwrap()
    }

    #[test]
    fn test_tally_uses_most_recent_event() {
        let devices = vec![
            device("a", &["Ready", "Register"]),
            device("b", &["Ready"]),
            device("c", &["Recycle", "Ready"]),
            device("d", &[]),
        ];
        let counts = tally_devices(&devices);

        assert_eq!(counts.len(), 2);
        assert_eq!(counts["Ready"], 2);
        assert_eq!(counts["Recycle"], 1);
    }

    #[test]
    fn test_from_rows_skips_untyped() {
        let rows: Vec<Row> = serde_json::from_value(json!([
            {"@type": "Ready", "count": 2},
            {"@type": null, "count": 5},
            {"count": 1},
            {"@type": "Recycle", "count": 1}
        ]))
        .unwrap();
        let counts = from_rows(&rows).unwrap();

        assert_eq!(counts.len(), 2);
        assert_eq!(counts["Ready"], 2);
    }

    #[test]
    fn test_from_rows_rejects_duplicates() {
        let rows: Vec<Row> = serde_json::from_value(json!([
            {"@type": "Ready", "count": 2},
            {"@type": "Ready", "count": 1}
        ]))
        .unwrap();
        assert!(matches!(
            from_rows(&rows),
            Err(AggregationError::MalformedAggregationResult(_))
        ));
    }

    #[test]
    fn test_restrict_to() {
        let devices = vec![device("a", &["Ready"]), device("b", &["Recycle"])];
        let counts = restrict_to(tally_devices(&devices), Some("Recycle"));
        assert_eq!(counts.keys().collect::<Vec<_>>(), vec!["Recycle"]);

        let all = restrict_to(tally_devices(&devices), None);
        assert_eq!(all.len(), 2);
    }
}
