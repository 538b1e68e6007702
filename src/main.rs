//! table-cache-tier: cached statistical table server.
//!
//! Serves table metadata and data slices from configured databases,
//! keeping file listings, modification times, metadata and data in a
//! bounded multi-tier cache in front of the filesystem.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use table_cache_tier::cache::{CachedDataSource, DatabaseCache};
use table_cache_tier::config::{Cli, Config};
use table_cache_tier::metrics::CacheMetrics;
use table_cache_tier::server::api::{build_router, AppState};
use table_cache_tier::source::{LocalFsConnector, PxReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "table_cache_tier=debug,tower_http=debug"
    } else {
        "table_cache_tier=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("table-cache-tier v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Config::load(&cli.config)?;

    info!(
        capacity_bytes = config.store.capacity_bytes,
        high_watermark = config.store.high_watermark,
        low_watermark = config.store.low_watermark,
        databases = config.databases.len(),
        "Configuration loaded"
    );

    // Build the cache and the data source in front of it.
    let metrics = CacheMetrics::new()?;
    let cache = DatabaseCache::from_config(&config, metrics);
    let source = Arc::new(CachedDataSource::new(cache.clone(), Arc::new(PxReader::new())));

    for db in &config.databases {
        info!(
            database = %db.id,
            root = %db.root_path.display(),
            extension = db.file_extension,
            revalidation_ms = db.revalidation_interval_ms,
            "Serving database"
        );
        let connector = LocalFsConnector::new(db.root_path.clone(), db.file_extension.clone());
        source.register_database(db.id.clone(), Arc::new(connector));
    }

    // Purge expired entries in the background so their cascades run.
    let scan_secs = config.store.expiration_scan_interval_secs;
    let _scanner = (scan_secs > 0).then(|| cache.spawn_expiration_scanner(Duration::from_secs(scan_secs)));

    // Build the HTTP router.
    let state = Arc::new(AppState::new(
        source,
        Duration::from_secs(config.server.request_timeout_secs),
    ));
    let app = build_router(state);

    // Start the server.
    let listen_addr = cli.listen.unwrap_or_else(|| config.server.listen.clone());
    info!(addr = listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
