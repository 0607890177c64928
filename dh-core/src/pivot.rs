//! Pivot reshaping of grouped rows into a dense month matrix.
//!
//! Input rows come from the month pipeline and look like
//! `{"subject": "OrgA", "counts": [5, 3], "months": [4, 2]}`. Every row
//! becomes one series with twelve slots, zero where the row has no month.

use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AggregationError, Result};
use crate::types::Row;

/// Calendar month names, in calendar order.
pub const MONTH_LABELS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Series label used for rows without a subject.
pub const OTHERS_LABEL: &str = "Others";

/// One chart series: a label and a value per month label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    pub label: String,
    pub values: Vec<u64>,
}

/// Dense label x series matrix ready for chart rendering.
///
/// Serializes to the chart payload `{labels, series, data}` where `series`
/// holds the labels and `data` the value rows, index-aligned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotMatrix {
    pub labels: Vec<String>,
    pub series: Vec<Series>,
}

impl PivotMatrix {
    pub fn empty() -> Self {
        Self {
            labels: MONTH_LABELS.iter().map(|m| m.to_string()).collect(),
            series: Vec::new(),
        }
    }

    pub fn series(&self, label: &str) -> Option<&Series> {
        self.series.iter().find(|s| s.label == label)
    }
}

impl Serialize for PivotMatrix {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let labels: Vec<&str> = self.series.iter().map(|s| s.label.as_str()).collect();
        let data: Vec<&[u64]> = self.series.iter().map(|s| s.values.as_slice()).collect();

        let mut state = serializer.serialize_struct("PivotMatrix", 3)?;
        state.serialize_field("labels", &self.labels)?;
        state.serialize_field("series", &labels)?;
        state.serialize_field("data", &data)?;
        state.end()
    }
}

#[derive(Deserialize)]
struct SubjectRow {
    #[serde(default)]
    subject: Value,
    counts: Vec<u64>,
    months: Vec<u32>,
}

/// Reshape month pipeline rows into a [`PivotMatrix`].
///
/// Series keep the input order, except the `"Others"` series which always
/// comes last. Any row that breaks the `{subject, counts, months}` contract
/// fails the whole reshape.
pub fn reshape(rows: &[Row]) -> Result<PivotMatrix> {
    let mut matrix = PivotMatrix::empty();
    let mut others = Vec::new();

    for (index, row) in rows.iter().enumerate() {
        let row: SubjectRow = serde_json::from_value(Value::Object(row.clone())).map_err(|e| {
            AggregationError::MalformedAggregationResult(format!("row {}: {}", index, e))
        })?;

        if row.counts.len() != row.months.len() {
            return Err(AggregationError::MalformedAggregationResult(format!(
                "row {}: {} counts for {} months",
                index,
                row.counts.len(),
                row.months.len()
            )));
        }

        let mut values = vec![0u64; MONTH_LABELS.len()];
        for (&month, &count) in row.months.iter().zip(&row.counts) {
            let slot = (month as usize)
                .checked_sub(1)
                .filter(|&i| i < values.len())
                .ok_or_else(|| {
                    AggregationError::MalformedAggregationResult(format!(
                        "row {}: month {} out of range",
                        index, month
                    ))
                })?;
            values[slot] = count;
        }

        match subject_label(&row.subject) {
            Some(label) => matrix.series.push(Series { label, values }),
            None => others.push(Series {
                label: OTHERS_LABEL.to_string(),
                values,
            }),
        }
    }

    matrix.series.extend(others);
    Ok(matrix)
}

fn subject_label(subject: &Value) -> Option<String> {
    match subject {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(value: Value) -> Vec<Row> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_reshape_places_counts_by_month() {
        let input = rows(json!([{"subject": "OrgA", "counts": [3, 5], "months": [2, 4]}]));
        let matrix = reshape(&input).unwrap();

        assert_eq!(matrix.labels.len(), 12);
        assert_eq!(matrix.labels[0], "January");
        assert_eq!(matrix.labels[11], "December");
        assert_eq!(matrix.series.len(), 1);
        assert_eq!(matrix.series[0].label, "OrgA");
        assert_eq!(matrix.series[0].values, vec![0, 3, 0, 5, 0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_null_subject_becomes_others_and_sorts_last() {
        let input = rows(json!([
            {"subject": null, "counts": [7], "months": [1]},
            {"subject": "OrgB", "counts": [1], "months": [12]},
            {"counts": [2], "months": [6]},
            {"subject": "OrgA", "counts": [4], "months": [3]}
        ]));
        let matrix = reshape(&input).unwrap();

        let labels: Vec<&str> = matrix.series.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["OrgB", "OrgA", "Others", "Others"]);
        assert_eq!(matrix.series[2].values[0], 7);
        assert_eq!(matrix.series[3].values[5], 2);
    }

    #[test]
    fn test_every_series_has_twelve_values() {
        let input = rows(json!([
            {"subject": "A", "counts": [], "months": []},
            {"subject": "B", "counts": [1, 2, 3], "months": [12, 6, 1]},
            {"subject": 42, "counts": [9], "months": [7]}
        ]));
        let matrix = reshape(&input).unwrap();

        for series in &matrix.series {
            assert_eq!(series.values.len(), matrix.labels.len());
        }
        assert!(matrix.series[0].values.iter().all(|&v| v == 0));
        assert_eq!(matrix.series[1].values[0], 3);
        assert_eq!(matrix.series[1].values[11], 1);
        assert_eq!(matrix.series[2].label, "42");
    }

    #[test]
    fn test_length_mismatch_is_malformed() {
        let input = rows(json!([
            {"subject": "OrgA", "counts": [1], "months": [1]},
            {"subject": "OrgB", "counts": [3, 5], "months": [2]}
        ]));
        let err = reshape(&input).unwrap_err();
        assert!(matches!(err, AggregationError::MalformedAggregationResult(_)));
    }

    #[test]
    fn test_out_of_range_month_is_malformed() {
        for month in [0, 13] {
            let input = rows(json!([{"subject": "OrgA", "counts": [1], "months": [month]}]));
            assert!(matches!(
                reshape(&input),
                Err(AggregationError::MalformedAggregationResult(_))
            ));
        }
    }

    #[test]
    fn test_missing_fields_are_malformed() {
        let input = rows(json!([{"subject": "OrgA", "months": [1]}]));
        assert!(matches!(
            reshape(&input),
            Err(AggregationError::MalformedAggregationResult(_))
        ));
    }

    #[test]
    fn test_chart_payload_serialization() {
        let input = rows(json!([{"subject": "OrgA", "counts": [3], "months": [2]}]));
        let payload = serde_json::to_value(reshape(&input).unwrap()).unwrap();

        assert_eq!(payload["labels"][1], "February");
        assert_eq!(payload["series"], json!(["OrgA"]));
        assert_eq!(payload["data"], json!([[0, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]]));
    }

    #[test]
    fn test_empty_input() {
        let matrix = reshape(&[]).unwrap();
        assert_eq!(matrix, PivotMatrix::empty());
    }
}
