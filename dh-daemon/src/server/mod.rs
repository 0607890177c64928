//! HTTP server for the DeviceHub daemon.
//!
//! Provides REST API for:
//! - Status and health checks
//! - Aggregation reports per database and resource

pub mod databases;
mod http;
pub mod state;

pub use databases::{Database, DatabaseError, DatabaseManager};
pub use http::create_router;
pub use state::AppState;
