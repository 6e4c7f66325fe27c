use std::net::SocketAddr;
use std::time::Instant;

use crate::engine::BookingError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: lifecycle operations. Labels: operation, outcome.
pub const OPERATIONS_TOTAL: &str = "waystay_operations_total";

/// Histogram: operation latency in seconds. Labels: operation.
pub const OPERATION_DURATION_SECONDS: &str = "waystay_operation_duration_seconds";

/// Counter: bookings created.
pub const BOOKINGS_CREATED_TOTAL: &str = "waystay_bookings_created_total";

/// Counter: create requests rejected because the dates were taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "waystay_booking_conflicts_total";

/// Counter: bookings confirmed.
pub const BOOKINGS_CONFIRMED_TOTAL: &str = "waystay_bookings_confirmed_total";

/// Counter: bookings cancelled.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "waystay_bookings_cancelled_total";

/// Counter: bookings moved to completed on read.
pub const BOOKINGS_COMPLETED_TOTAL: &str = "waystay_bookings_completed_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: intervals currently held in the availability index.
pub const HELD_INTERVALS: &str = "waystay_held_intervals";

/// Counter: intervals that could not be released and need reconciliation.
pub const HELD_INTERVAL_LEAKS_TOTAL: &str = "waystay_held_interval_leaks_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "waystay_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "waystay_wal_flush_batch_size";

/// Counter: WAL compactions performed.
pub const WAL_COMPACTIONS_TOTAL: &str = "waystay_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Short label for the outcome of an operation.
pub fn outcome_label<T>(result: &Result<T, BookingError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.label(),
    }
}

/// Record latency and outcome of one lifecycle operation.
pub fn record_outcome<T>(operation: &'static str, started: Instant, result: &Result<T, BookingError>) {
    let outcome = outcome_label(result);
    metrics::counter!(OPERATIONS_TOTAL, "operation" => operation, "outcome" => outcome).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "operation" => operation)
        .record(started.elapsed().as_secs_f64());

    match (operation, result) {
        ("create", Ok(_)) => metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(1),
        ("create", Err(BookingError::BookingConflict { .. })) => {
            metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1)
        }
        ("confirm", Ok(_)) => metrics::counter!(BOOKINGS_CONFIRMED_TOTAL).increment(1),
        ("cancel", Ok(_)) => metrics::counter!(BOOKINGS_CANCELLED_TOTAL).increment(1),
        _ => {}
    }
}
