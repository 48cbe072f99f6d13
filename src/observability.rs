use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "huddle_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "huddle_query_duration_seconds";

/// Counter: bookings admitted (created, not replayed).
pub const BOOKINGS_CREATED_TOTAL: &str = "huddle_bookings_created_total";

/// Counter: admissions refused because of an overlapping booking.
pub const BOOKING_CONFLICTS_TOTAL: &str = "huddle_booking_conflicts_total";

/// Counter: idempotent replays served from the ledger.
pub const IDEMPOTENT_REPLAYS_TOTAL: &str = "huddle_idempotent_replays_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "huddle_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "huddle_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "huddle_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "huddle_tenants_active";

/// Counter: stale in-progress idempotency claims reclaimed by the reaper.
pub const STALE_CLAIMS_RECLAIMED_TOTAL: &str = "huddle_stale_claims_reclaimed_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "huddle_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "huddle_wal_flush_batch_size";

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
        Command::CreateRoom { .. } => "create_room",
        Command::ListRooms { .. } => "list_rooms",
        Command::CreateBooking { .. } => "create_booking",
        Command::ListBookings { .. } => "list_bookings",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::Utilization { .. } => "room_utilization",
        Command::Listen { .. } => "listen",
    }
}
