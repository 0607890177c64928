//! Capabilities the aggregation layer depends on.
//!
//! Both traits are deliberately narrow so tests can swap in deterministic
//! stubs. The in-memory [`MemoryStore`](crate::store::MemoryStore) implements
//! both.
//!
//! # Example
//!
//! ```ignore
//! use dh_daemon::engine::{AggregationEngine, EngineFuture};
//!
//! struct Fixed(Vec<Row>);
//!
//! impl AggregationEngine for Fixed {
//!     fn aggregate<'a>(&'a self, _resource: &'a str, _pipeline: &'a Pipeline) -> EngineFuture<'a, Vec<Row>> {
//!         Box::pin(async move { Ok(self.0.clone()) })
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;

use dh_core::{DeviceRecord, EngineError, Pipeline, Row};

/// Boxed future returned by capability methods.
pub type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EngineError>> + Send + 'a>>;

/// Executes aggregation pipelines against a named collection.
pub trait AggregationEngine: Send + Sync {
    fn aggregate<'a>(&'a self, resource: &'a str, pipeline: &'a Pipeline)
        -> EngineFuture<'a, Vec<Row>>;
}

/// Resolves the devices contained, directly or through nested groups, in a
/// set of groups.
pub trait GroupDomain: Send + Sync {
    fn descendant_devices<'a>(
        &'a self,
        resource: &'a str,
        group_ids: &'a [String],
    ) -> EngineFuture<'a, Vec<DeviceRecord>>;
}
