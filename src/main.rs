use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use waystay::catalog::InMemoryCatalog;
use waystay::clock::SystemClock;
use waystay::compactor;
use waystay::config::Config;
use waystay::engine::{BookingManager, WalStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    waystay::observability::init(config.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let store = Arc::new(WalStore::open(&config.wal_path())?);
    let catalog = match &config.catalog_path {
        Some(path) => {
            let catalog = InMemoryCatalog::load(path)?;
            info!("loaded {} listings from {}", catalog.len(), path.display());
            catalog
        }
        None => {
            warn!("WAYSTAY_CATALOG not set, starting with an empty catalog");
            InMemoryCatalog::new()
        }
    };

    let manager = BookingManager::new(
        store.clone(),
        Arc::new(catalog),
        Arc::new(SystemClock),
        config.booking.clone(),
    )
    .await?;

    info!("waystay booking core ready");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  bookings: {}", store.len());
    info!("  held intervals: {}", manager.availability().interval_count().await);
    info!("  auto_confirm: {}", manager.config().auto_confirm);
    info!("  pricing: {:?}", manager.config().pricing);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let compactor = tokio::spawn(compactor::run_compactor(
        store.clone(),
        config.compact_threshold,
        Duration::from_secs(30),
    ));

    shutdown_signal().await?;
    info!("shutdown signal received");
    compactor.abort();

    // Leave a compact log behind so the next start replays quickly.
    if let Err(e) = store.compact().await {
        warn!("final compaction failed: {e}");
    }
    info!("waystay stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = ctrl_c => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }
    Ok(())
}
