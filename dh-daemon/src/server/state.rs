//! Shared application state for the server.

use std::sync::Arc;
use std::time::Instant;

use super::databases::DatabaseManager;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Databases served by this daemon
    pub databases: Arc<DatabaseManager>,
    /// When the daemon started
    pub start_time: Instant,
}

impl AppState {
    pub fn new(databases: Arc<DatabaseManager>) -> Self {
        Self {
            databases,
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }
}
