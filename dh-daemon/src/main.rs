//! DeviceHub daemon - aggregation reports over device event history.
//!
//! A single Rust binary that provides:
//! - HTTP API for the monthly device report and the type census
//! - Per-database result caching with request coalescing
//! - Lazy loading of databases from a data directory

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dh_daemon::config::{DaemonConfig, Overrides, CONFIG_FILE};
use dh_daemon::server::{create_router, AppState, DatabaseManager};

/// DeviceHub aggregation daemon
#[derive(Parser, Debug)]
#[command(name = "dh-daemon")]
#[command(about = "DeviceHub aggregation and pivot daemon")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Directory holding one subdirectory per database
    #[arg(long, env = "DH_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// HTTP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Result cache TTL in seconds
    #[arg(long)]
    cache_ttl: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    let config = DaemonConfig::load(&cli.config).with_overrides(Overrides {
        host: cli.host,
        port: cli.port,
        cache_ttl_secs: cli.cache_ttl,
        data_dir: cli.data_dir,
    });

    info!("Starting DeviceHub daemon");
    info!("Data directory: {:?}", config.data.dir);
    info!("Cache TTL: {}s", config.cache.ttl_secs);

    let databases = Arc::new(DatabaseManager::new(
        config.data.dir.clone(),
        config.cache_ttl(),
    ));
    let router = create_router(AppState::new(databases));

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("DeviceHub daemon listening on http://{}", addr);

    axum::serve(listener, router).await?;
    Ok(())
}
