//! DeviceHub aggregation daemon.
//!
//! This library provides:
//! - Result cache with in-flight request coalescing
//! - Report composition over the aggregation engine
//! - In-memory document store implementing the engine seams
//! - HTTP API exposing the reports per database

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod engine;
pub mod server;
pub mod store;
