//! Multi-database support for the DeviceHub daemon.
//!
//! Every database is a directory under the data root. Databases are opened
//! lazily on first request and kept for the lifetime of the daemon, each
//! with its own [`Aggregator`] and result cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::aggregator::Aggregator;
use crate::store::MemoryStore;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Invalid database name: {0:?}")]
    InvalidName(String),

    #[error("Database not found: {0}")]
    NotFound(String),

    #[error("Failed to open database {name}: {source:#}")]
    Open {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// An opened database: its documents and the aggregator over them.
pub struct Database {
    name: String,
    store: Arc<MemoryStore>,
    aggregator: Aggregator,
}

impl Database {
    pub fn new(name: impl Into<String>, store: Arc<MemoryStore>, cache_ttl: Duration) -> Self {
        Self {
            name: name.into(),
            aggregator: Aggregator::from_store(store.clone(), cache_ttl),
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }
}

/// Manages the databases served by the daemon.
///
/// Caches opened databases keyed by name. Thread-safe via tokio RwLock.
pub struct DatabaseManager {
    /// Root directory holding one subdirectory per database
    data_dir: PathBuf,
    /// TTL of each database's result cache
    cache_ttl: Duration,
    /// Opened databases
    cache: RwLock<HashMap<String, Arc<Database>>>,
}

impl DatabaseManager {
    pub fn new(data_dir: PathBuf, cache_ttl: Duration) -> Self {
        Self {
            data_dir,
            cache_ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Get a database by name, opening it from the data directory if needed.
    pub async fn get(&self, name: &str) -> Result<Arc<Database>, DatabaseError> {
        validate_name(name)?;

        // Check cache
        {
            let cache = self.cache.read().await;
            if let Some(db) = cache.get(name) {
                return Ok(db.clone());
            }
        }

        let dir = self.data_dir.join(name);
        if !dir.is_dir() {
            debug!("No database directory at {:?}", dir);
            return Err(DatabaseError::NotFound(name.to_string()));
        }

        let mut cache = self.cache.write().await;
        // Another request may have opened it while we waited for the lock
        if let Some(db) = cache.get(name) {
            return Ok(db.clone());
        }

        info!("Opening database: {:?}", dir);
        let store = MemoryStore::load_dir(&dir).map_err(|source| DatabaseError::Open {
            name: name.to_string(),
            source,
        })?;
        let db = Arc::new(Database::new(name, Arc::new(store), self.cache_ttl));
        cache.insert(name.to_string(), db.clone());
        Ok(db)
    }

    /// Serve an already populated store under `name`, replacing any
    /// database previously opened with that name.
    pub async fn register(
        &self,
        name: &str,
        store: Arc<MemoryStore>,
    ) -> Result<Arc<Database>, DatabaseError> {
        validate_name(name)?;
        let db = Arc::new(Database::new(name, store, self.cache_ttl));
        self.cache.write().await.insert(name.to_string(), db.clone());
        info!("Registered database: {}", name);
        Ok(db)
    }

    /// Number of opened databases.
    pub async fn database_count(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Opened databases, sorted by name.
    pub async fn list_databases(&self) -> Vec<Arc<Database>> {
        let cache = self.cache.read().await;
        let mut dbs: Vec<Arc<Database>> = cache.values().cloned().collect();
        dbs.sort_by(|a, b| a.name.cmp(&b.name));
        dbs
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }
}

/// Database names are single path segments.
fn validate_name(name: &str) -> Result<(), DatabaseError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(DatabaseError::InvalidName(name.to_string()))
    }
}
