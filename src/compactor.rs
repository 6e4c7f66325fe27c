use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::WalStore;

/// Background task that rewrites the booking log once enough appends pile up.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}

/// Compact when the log has grown by at least `threshold` appends. Returns whether it did.
pub async fn compact_if_due(store: &WalStore, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        debug!("compactor skip: {appends} appends since last compaction");
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            info!("compacted booking log after {appends} appends, {} bookings", store.len());
            true
        }
        Err(e) => {
            warn!("compaction failed: {e}");
            false
        }
    }
}
