use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "tatami_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "tatami_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "tatami_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "tatami_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "tatami_connections_rejected_total";

/// Gauge: number of active gyms (loaded engines).
pub const GYMS_ACTIVE: &str = "tatami_gyms_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tatami_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "tatami_wal_flush_batch_size";

/// Counter: bookings auto-completed by the background sweep.
pub const BOOKINGS_SWEPT_TOTAL: &str = "tatami_bookings_swept_total";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertCoach { .. } => "insert_coach",
        Command::DeleteCoach { .. } => "delete_coach",
        Command::InsertSlots { .. } => "insert_slots",
        Command::DeleteSlot { .. } => "delete_slot",
        Command::InsertBooking { .. } => "insert_booking",
        Command::BookPackage { .. } => "book_package",
        Command::SubmitProof { .. } => "submit_proof",
        Command::ResolvePayment { .. } => "resolve_payment",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::CompleteBooking { .. } => "complete_booking",
        Command::SelectCoaches => "select_coaches",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectPackages { .. } => "select_packages",
        Command::SelectHistory { .. } => "select_history",
        Command::Listen { .. } => "listen",
    }
}
