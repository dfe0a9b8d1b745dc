use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total HTTP requests handled. Labels: route, status.
pub const REQUESTS_TOTAL: &str = "fitsched_requests_total";

/// Counter: appointments booked.
pub const BOOKINGS_TOTAL: &str = "fitsched_bookings_total";

/// Counter: booking attempts rejected because the slot was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "fitsched_booking_conflicts_total";

/// Counter: appointments cancelled.
pub const CANCELLATIONS_TOTAL: &str = "fitsched_cancellations_total";

/// Counter: availability queries served.
pub const SLOT_QUERIES_TOTAL: &str = "fitsched_slot_queries_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "fitsched_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "fitsched_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
