//! Request and record types shared by the builder, the reshaper and the census.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AggregationError;

/// A single document returned by the aggregation engine.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Event type whose matches may be narrowed by receiver sub-type.
pub const RECEIVE_EVENT: &str = "Receive";

/// Dimension a month report groups its series by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupDimension {
    Organization,
    User,
    Place,
    Type,
}

impl GroupDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupDimension::Organization => "organization",
            GroupDimension::User => "user",
            GroupDimension::Place => "place",
            GroupDimension::Type => "type",
        }
    }

    /// Event field holding the subject value for this dimension.
    ///
    /// Receive events record the receiving organization separately from the
    /// organization that performed the event.
    pub fn subject_field(&self, event_type: &str) -> &'static str {
        match self {
            GroupDimension::Organization if event_type == RECEIVE_EVENT => "receiverOrganization",
            GroupDimension::Organization => "byOrganization",
            GroupDimension::User => "byUser",
            GroupDimension::Place => "place",
            GroupDimension::Type => "type",
        }
    }
}

impl FromStr for GroupDimension {
    type Err = AggregationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "organization" => Ok(GroupDimension::Organization),
            "user" => Ok(GroupDimension::User),
            "place" => Ok(GroupDimension::Place),
            "type" => Ok(GroupDimension::Type),
            other => Err(AggregationError::invalid_dimension("subject", other)),
        }
    }
}

impl fmt::Display for GroupDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver sub-type of a Receive event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReceiverType {
    CollectionPoint,
    RecyclingPoint,
    FinalUser,
}

impl ReceiverType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiverType::CollectionPoint => "CollectionPoint",
            ReceiverType::RecyclingPoint => "RecyclingPoint",
            ReceiverType::FinalUser => "FinalUser",
        }
    }
}

impl FromStr for ReceiverType {
    type Err = AggregationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CollectionPoint" => Ok(ReceiverType::CollectionPoint),
            "RecyclingPoint" => Ok(ReceiverType::RecyclingPoint),
            "FinalUser" => Ok(ReceiverType::FinalUser),
            other => Err(AggregationError::invalid_dimension("receiverType", other)),
        }
    }
}

/// A month report request as received from the caller.
///
/// Dimensions are kept as the caller spelled them; the pipeline builder is
/// the single place that validates them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationRequest {
    pub resource_name: String,
    pub event_type: String,
    pub group_dimension: String,
    pub series_sub_dimension: Option<String>,
    pub range_start: DateTime<Utc>,
}

impl AggregationRequest {
    pub fn new(
        resource_name: impl Into<String>,
        event_type: impl Into<String>,
        group_dimension: impl Into<String>,
        range_start: DateTime<Utc>,
    ) -> Self {
        Self {
            resource_name: resource_name.into(),
            event_type: event_type.into(),
            group_dimension: group_dimension.into(),
            series_sub_dimension: None,
            range_start,
        }
    }

    /// Restrict Receive events to a receiver sub-type.
    pub fn with_receiver_type(mut self, receiver_type: impl Into<String>) -> Self {
        self.series_sub_dimension = Some(receiver_type.into());
        self
    }
}

/// Reference to an event as embedded in a device document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    #[serde(rename = "@type")]
    pub type_tag: String,
}

/// A device as exposed by the group domain.
///
/// `events` is ordered newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub events: Vec<EventRef>,
}

impl DeviceRecord {
    /// Type tag of the most recent event, if the device has any.
    pub fn last_event_type(&self) -> Option<&str> {
        self.events.first().map(|e| e.type_tag.as_str())
    }
}
