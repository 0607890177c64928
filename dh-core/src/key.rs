//! Cache key derivation.

use serde::Serialize;
use std::fmt;
use std::hash::{Hash, Hasher};
use xxhash_rust::xxh3::Xxh3;

use crate::pipeline::Pipeline;

/// Structural hash of a `(resource, pipeline)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CacheKey(u64);

impl CacheKey {
    /// Derive the key for running `pipeline` against `resource`.
    ///
    /// Two pipelines with the same stages in the same order always map to the
    /// same key; reordering stages, fields or conditions changes it.
    pub fn derive(resource: &str, pipeline: &Pipeline) -> Self {
        let mut hasher = Xxh3::new();
        resource.hash(&mut hasher);
        pipeline.hash(&mut hasher);
        CacheKey(hasher.finish())
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xxh3:{:016x}", self.0)
    }
}
