//! In-memory document store.
//!
//! Provides a stand-alone implementation of both engine capabilities:
//! - JSON collections loaded from a per-database directory
//! - Evaluation of the aggregation stage vocabulary
//! - Descendant traversal over nested groups

mod eval;
mod memory;

pub use eval::{run_pipeline, EvalError};
pub use memory::{Document, MemoryStore, GROUPS_COLLECTION};
