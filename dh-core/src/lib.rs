//! DeviceHub aggregation core - pipeline construction and chart reshaping.
//!
//! This crate holds the pure half of the aggregation engine. Nothing in here
//! performs I/O; executing a pipeline is the job of an engine capability that
//! lives in `dh-daemon`.
//!
//! # Features
//!
//! - **Stage vocabulary**: match, unwind, group, project and sort stages in
//!   document-store notation
//! - **Pipeline building**: report requests become immutable pipelines
//! - **Cache keys**: structural xxh3 hashing of `(resource, pipeline)`
//! - **Pivot reshaping**: sparse grouped rows become a dense month matrix
//! - **Type census**: tallying of device type tags
//!
//! # Usage
//!
//! ```rust,ignore
//! use dh_core::{AggregationRequest, PipelineBuilder, pivot};
//!
//! let request = AggregationRequest::new("events", "Receive", "organization", start);
//! let pipeline = PipelineBuilder::devices_per_event_subject_month(&request)?;
//! let rows = engine.aggregate("events", &pipeline).await?;
//! let matrix = pivot::reshape(&rows)?;
//! ```

pub mod census;
pub mod error;
pub mod key;
pub mod pipeline;
pub mod pivot;
pub mod stage;
pub mod types;

pub use census::TypeCounts;
pub use error::{AggregationError, EngineError};
pub use key::CacheKey;
pub use pipeline::{Pipeline, PipelineBuilder};
pub use pivot::PivotMatrix;
pub use types::{AggregationRequest, DeviceRecord, GroupDimension, ReceiverType, Row};
