//! Daemon configuration loading from `.dhrc.toml`.
//!
//! Configuration is optional. Missing sections and keys fall back to
//! defaults, and command line flags override whatever the file sets.
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 9130
//!
//! [cache]
//! ttl_secs = 60
//!
//! [data]
//! dir = "/var/lib/devicehub"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::DEFAULT_TTL;

/// Name of the configuration file looked up by default.
pub const CONFIG_FILE: &str = ".dhrc.toml";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9130;
pub const DEFAULT_CACHE_TTL_SECS: u64 = DEFAULT_TTL.as_secs();
pub const DEFAULT_DATA_DIR: &str = "data";

/// Root configuration structure loaded from `.dhrc.toml`.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct DaemonConfig {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Result cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Where databases are loaded from.
    #[serde(default)]
    pub data: DataConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Result cache configuration.
///
/// Every database gets its own cache with this TTL. A TTL of zero makes
/// every report recompute, while concurrent identical requests still share
/// one engine call.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

/// Data directory configuration.
///
/// Each subdirectory is a database; each `<collection>.json` file inside it
/// holds an array of documents.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
        }
    }
}

/// Values given on the command line. `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub cache_ttl_secs: Option<u64>,
    pub data_dir: Option<PathBuf>,
}

impl DaemonConfig {
    /// Load configuration from a file.
    ///
    /// A missing file yields defaults. Unreadable or unparsable files are
    /// logged as warnings and also yield defaults.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            tracing::debug!("No config file at {:?}, using defaults", path);
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to parse {:?}: {}", path, e);
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {:?}: {}", path, e);
            }
        }
        Self::default()
    }

    /// Apply command line overrides on top of the loaded values.
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(host) = overrides.host {
            self.server.host = host;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(ttl) = overrides.cache_ttl_secs {
            self.cache.ttl_secs = ttl;
        }
        if let Some(dir) = overrides.data_dir {
            self.data.dir = dir;
        }
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
