//! Pipeline construction.
//!
//! A [`Pipeline`] is assembled in one go by [`PipelineBuilder`] and cannot be
//! changed afterwards, so its cache key is fixed from the moment it exists.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::stage::{
    Accumulator, Expr, FieldPath, Filter, Group, GroupId, Projection, SortOrder, SortSpec, Stage,
};
use crate::types::{AggregationRequest, GroupDimension, ReceiverType, RECEIVE_EVENT};

/// Event document fields the month report reads.
const CREATED_FIELD: &str = "_created";
const TYPE_FIELD: &str = "@type";
const DEVICES_FIELD: &str = "devices";
const RECEIVER_TYPE_FIELD: &str = "type";

/// Ordered, immutable sequence of stages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Pipeline {
    stages: Arc<[Stage]>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            stages: stages.into(),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// First instant of the calendar year containing `now`.
pub fn start_of_year(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

/// Builds pipelines for the supported report kinds.
pub struct PipelineBuilder;

impl PipelineBuilder {
    /// Devices per event, subject and month.
    ///
    /// Output rows have the shape `{subject, counts, months}` where `counts`
    /// and `months` are parallel arrays ordered by descending month.
    pub fn devices_per_event_subject_month(request: &AggregationRequest) -> Result<Pipeline> {
        let dimension: GroupDimension = request.group_dimension.parse()?;
        let receiver_type = request
            .series_sub_dimension
            .as_deref()
            .map(str::parse::<ReceiverType>)
            .transpose()?;

        let mut filter = Filter::new()
            .where_eq(TYPE_FIELD, request.event_type.as_str())
            .where_gte(CREATED_FIELD, request.range_start);
        if let Some(receiver_type) = receiver_type {
            if request.event_type == RECEIVE_EVENT {
                filter = filter.where_eq(RECEIVER_TYPE_FIELD, receiver_type.as_str());
            }
        }

        let subject_field = dimension.subject_field(&request.event_type);
        debug!(
            event = %request.event_type,
            subject = subject_field,
            "building month pipeline"
        );

        let stages = vec![
            Stage::Match(filter),
            Stage::Unwind(FieldPath::new(DEVICES_FIELD)),
            Stage::Group(Group {
                id: GroupId::Fields(vec![
                    ("month".to_string(), Expr::Month(FieldPath::new(CREATED_FIELD))),
                    ("subject".to_string(), Expr::field(subject_field)),
                ]),
                accumulators: vec![(
                    "arrayOfDevices".to_string(),
                    Accumulator::Push(Expr::field(DEVICES_FIELD)),
                )],
            }),
            Stage::Project(Projection {
                fields: vec![
                    ("month".to_string(), Expr::field("_id.month")),
                    ("subject".to_string(), Expr::field("_id.subject")),
                    (
                        "countPerSubjectAndMonth".to_string(),
                        Expr::Size(Box::new(Expr::field("arrayOfDevices"))),
                    ),
                ],
            }),
            Stage::Sort(SortSpec(vec![
                (FieldPath::new("subject"), SortOrder::Descending),
                (FieldPath::new("month"), SortOrder::Descending),
            ])),
            Stage::Group(Group {
                id: GroupId::Fields(vec![("subject".to_string(), Expr::field("subject"))]),
                accumulators: vec![
                    (
                        "counts".to_string(),
                        Accumulator::Push(Expr::field("countPerSubjectAndMonth")),
                    ),
                    ("months".to_string(), Accumulator::Push(Expr::field("month"))),
                ],
            }),
            Stage::Project(Projection {
                fields: vec![
                    ("subject".to_string(), Expr::field("_id.subject")),
                    ("counts".to_string(), Expr::field("counts")),
                    ("months".to_string(), Expr::field("months")),
                ],
            }),
        ];

        Ok(Pipeline::new(stages))
    }

    /// Count of records per type tag of their most recent event.
    ///
    /// Output rows have the shape `{@type, count}`.
    pub fn type_census() -> Pipeline {
        Pipeline::new(vec![
            Stage::Project(Projection {
                fields: vec![(
                    "event".to_string(),
                    Expr::ArrayElemAt(FieldPath::new("events"), 0),
                )],
            }),
            Stage::Group(Group {
                id: GroupId::Expr(Expr::field("event.@type")),
                accumulators: vec![("count".to_string(), Accumulator::Sum(1))],
            }),
            Stage::Project(Projection {
                fields: vec![
                    ("@type".to_string(), Expr::field("_id")),
                    ("count".to_string(), Expr::field("count")),
                ],
            }),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AggregationError;
    use crate::stage::{Condition, Literal};
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn match_filter(pipeline: &Pipeline) -> &Filter {
        match &pipeline.stages()[0] {
            Stage::Match(filter) => filter,
            other => panic!("expected $match first, got {}", other.name()),
        }
    }

    #[test]
    fn test_month_pipeline_shape() {
        let request = AggregationRequest::new("events", "Recycle", "organization", start());
        let pipeline = PipelineBuilder::devices_per_event_subject_month(&request).unwrap();

        let names: Vec<&str> = pipeline.stages().iter().map(Stage::name).collect();
        assert_eq!(
            names,
            vec!["$match", "$unwind", "$group", "$project", "$sort", "$group", "$project"]
        );

        let filter = match_filter(&pipeline);
        assert_eq!(
            filter.condition_for("@type"),
            Some(&Condition::Eq(Literal::from("Recycle")))
        );
        assert_eq!(
            filter.condition_for("_created"),
            Some(&Condition::Gte(Literal::Timestamp(start())))
        );
        assert!(filter.condition_for("type").is_none());
    }

    #[test]
    fn test_receive_with_receiver_type_in_same_match() {
        let request = AggregationRequest::new("events", "Receive", "organization", start())
            .with_receiver_type("CollectionPoint");
        let pipeline = PipelineBuilder::devices_per_event_subject_month(&request).unwrap();

        let filter = match_filter(&pipeline);
        assert_eq!(filter.conditions().len(), 3);
        assert_eq!(
            filter.condition_for("@type"),
            Some(&Condition::Eq(Literal::from("Receive")))
        );
        assert_eq!(
            filter.condition_for("type"),
            Some(&Condition::Eq(Literal::from("CollectionPoint")))
        );
        let matches = pipeline
            .stages()
            .iter()
            .filter(|s| matches!(s, Stage::Match(_)))
            .count();
        assert_eq!(matches, 1);
    }

    #[test]
    fn test_receiver_type_ignored_for_other_events() {
        let plain = AggregationRequest::new("events", "Recycle", "place", start());
        let with_receiver = plain.clone().with_receiver_type("FinalUser");

        let a = PipelineBuilder::devices_per_event_subject_month(&plain).unwrap();
        let b = PipelineBuilder::devices_per_event_subject_month(&with_receiver).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_dimensions_rejected() {
        let request = AggregationRequest::new("events", "Receive", "planet", start());
        let err = PipelineBuilder::devices_per_event_subject_month(&request).unwrap_err();
        assert!(matches!(
            err,
            AggregationError::InvalidDimension { dimension: "subject", .. }
        ));

        let request = AggregationRequest::new("events", "Receive", "user", start())
            .with_receiver_type("Warehouse");
        let err = PipelineBuilder::devices_per_event_subject_month(&request).unwrap_err();
        assert!(matches!(
            err,
            AggregationError::InvalidDimension { dimension: "receiverType", .. }
        ));
    }

    #[test]
    fn test_build_is_deterministic() {
        let request = AggregationRequest::new("events", "Receive", "user", start());
        let a = PipelineBuilder::devices_per_event_subject_month(&request).unwrap();
        let b = PipelineBuilder::devices_per_event_subject_month(&request).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_start_of_year() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 13, 45, 0).unwrap();
        assert_eq!(start_of_year(now), start());
    }

    #[test]
    fn test_census_pipeline_serialization() {
        let json = serde_json::to_value(PipelineBuilder::type_census()).unwrap();
        assert_eq!(json[0]["$project"]["event"]["$arrayElemAt"][1], 0);
        assert_eq!(json[1]["$group"]["_id"], "$event.@type");
        assert_eq!(json[1]["$group"]["count"]["$sum"], 1);
    }
}
