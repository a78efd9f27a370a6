use std::net::SocketAddr;

// ── booking metrics ─────────────────────────────────────────────

/// Counter: bookings created. Labels: family (laptop/cubicle).
pub const BOOKINGS_CREATED_TOTAL: &str = "carrel_bookings_created_total";

/// Counter: creates rejected because the window was already taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "carrel_booking_conflicts_total";

/// Counter: bookings finalized.
pub const BOOKINGS_FINALIZED_TOTAL: &str = "carrel_bookings_finalized_total";

/// Counter: bookings cancelled (caller- and reaper-initiated).
pub const BOOKINGS_CANCELLED_TOTAL: &str = "carrel_bookings_cancelled_total";

/// Counter: invitation responses recorded. Labels: answer.
pub const INVITATIONS_ANSWERED_TOTAL: &str = "carrel_invitations_answered_total";

// ── loan metrics ────────────────────────────────────────────────

/// Counter: loans requested.
pub const LOANS_REQUESTED_TOTAL: &str = "carrel_loans_requested_total";

/// Counter: loans handed over by staff.
pub const LOANS_DELIVERED_TOTAL: &str = "carrel_loans_delivered_total";

/// Counter: loans returned. Labels: late.
pub const LOANS_RETURNED_TOTAL: &str = "carrel_loans_returned_total";

/// Counter: loans cancelled before delivery.
pub const LOANS_CANCELLED_TOTAL: &str = "carrel_loans_cancelled_total";

/// Counter: mutations rejected by a wall-clock gate. Labels: gate.
pub const GATE_REJECTIONS_TOTAL: &str = "carrel_gate_rejections_total";

// ── engine internals ────────────────────────────────────────────

/// Gauge: resources currently registered.
pub const RESOURCES_ACTIVE: &str = "carrel_resources_active";

/// Counter: stale pending reservations cancelled by the reaper.
pub const REAPED_PENDING_TOTAL: &str = "carrel_reaped_pending_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "carrel_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "carrel_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if `port`
/// is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
