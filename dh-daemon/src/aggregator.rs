//! Report composition.
//!
//! An [`Aggregator`] owns the result cache for one database and turns report
//! requests into chart payloads:
//!
//! 1. Build the pipeline for the report kind
//! 2. Fetch rows through the [`ResultCache`]
//! 3. Reshape rows into the response type

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use dh_core::error::Result;
use dh_core::pipeline::start_of_year;
use dh_core::{
    census, pivot, AggregationError, AggregationRequest, PipelineBuilder, PivotMatrix, TypeCounts,
};

use crate::cache::ResultCache;
use crate::engine::{AggregationEngine, GroupDomain};
use crate::store::MemoryStore;

/// Report kinds reachable through the aggregation endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportMethod {
    DevicesPerEventSubjectMonth,
    TypeCensus,
}

impl ReportMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportMethod::DevicesPerEventSubjectMonth => "devicesPerEventSubjectMonth",
            ReportMethod::TypeCensus => "typeCensus",
        }
    }
}

impl FromStr for ReportMethod {
    type Err = AggregationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "devicesPerEventSubjectMonth" => Ok(ReportMethod::DevicesPerEventSubjectMonth),
            "typeCensus" => Ok(ReportMethod::TypeCensus),
            other => Err(AggregationError::UnknownMethod(other.to_string())),
        }
    }
}

/// Query parameters accepted by the report methods.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportParams {
    /// Event type tag, e.g. `Receive`.
    pub event: Option<String>,
    /// Group dimension of the month report.
    pub subject: Option<String>,
    /// Receiver sub-type for Receive events.
    #[serde(rename = "receiverType")]
    pub receiver_type: Option<String>,
    /// Start of the reporting range; defaults to the start of the current year.
    pub from: Option<DateTime<Utc>>,
    /// Comma separated group ids scoping a census.
    pub groups: Option<String>,
}

impl ReportParams {
    fn group_scope(&self) -> Option<Vec<String>> {
        let ids: Vec<String> = self
            .groups
            .as_deref()?
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        (!ids.is_empty()).then_some(ids)
    }
}

/// Response body of a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Report {
    Pivot(PivotMatrix),
    Census(TypeCounts),
}

/// Runs reports for one database.
pub struct Aggregator {
    cache: ResultCache,
    groups: Arc<dyn GroupDomain>,
}

impl Aggregator {
    pub fn new(
        engine: Arc<dyn AggregationEngine>,
        groups: Arc<dyn GroupDomain>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            cache: ResultCache::new(engine, cache_ttl),
            groups,
        }
    }

    /// Aggregator backed by a single store for both capabilities.
    pub fn from_store(store: Arc<MemoryStore>, cache_ttl: Duration) -> Self {
        Self::new(store.clone(), store, cache_ttl)
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Number of devices per event, subject and month of the range.
    pub async fn devices_per_event_subject_month(
        &self,
        request: &AggregationRequest,
    ) -> Result<PivotMatrix> {
        let pipeline = PipelineBuilder::devices_per_event_subject_month(request)?;
        let rows = self.cache.get(&request.resource_name, &pipeline).await?;
        let matrix = pivot::reshape(&rows)?;
        debug!(
            resource = %request.resource_name,
            series = matrix.series.len(),
            "month report ready"
        );
        Ok(matrix)
    }

    /// Count of devices per type tag of their most recent event.
    ///
    /// With a group scope the descendants of those groups are tallied in
    /// memory; without one the census pipeline runs through the cache.
    pub async fn type_census(
        &self,
        resource: &str,
        event_type: Option<&str>,
        group_scope: Option<&[String]>,
    ) -> Result<TypeCounts> {
        let counts = match group_scope {
            Some(group_ids) => {
                let devices = self.groups.descendant_devices(resource, group_ids).await?;
                debug!(resource, devices = devices.len(), "scoped census");
                census::tally_devices(&devices)
            }
            None => {
                let rows = self
                    .cache
                    .get(resource, &PipelineBuilder::type_census())
                    .await?;
                census::from_rows(&rows)?
            }
        };
        Ok(census::restrict_to(counts, event_type))
    }

    /// Dispatch a report by method name.
    pub async fn run(&self, resource: &str, method: &str, params: &ReportParams) -> Result<Report> {
        let method: ReportMethod = method.parse()?;
        info!(resource, method = method.as_str(), "running report");

        match method {
            ReportMethod::DevicesPerEventSubjectMonth => {
                let event = params
                    .event
                    .as_deref()
                    .ok_or(AggregationError::MissingParameter("event"))?;
                let subject = params
                    .subject
                    .as_deref()
                    .ok_or(AggregationError::MissingParameter("subject"))?;
                let range_start = params.from.unwrap_or_else(|| start_of_year(Utc::now()));

                let mut request = AggregationRequest::new(resource, event, subject, range_start);
                if let Some(receiver_type) = &params.receiver_type {
                    request = request.with_receiver_type(receiver_type.as_str());
                }
                self.devices_per_event_subject_month(&request)
                    .await
                    .map(Report::Pivot)
            }
            ReportMethod::TypeCensus => {
                let scope = params.group_scope();
                self.type_census(resource, params.event.as_deref(), scope.as_deref())
                    .await
                    .map(Report::Census)
            }
        }
    }
}
