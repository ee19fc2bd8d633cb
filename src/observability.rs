use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "rota_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "rota_query_duration_seconds";

/// Counter: event creations refused because a day was full.
pub const EVENTS_REJECTED_TOTAL: &str = "rota_events_rejected_total";

/// Counter: update sub-changes. Labels: field (dates, role, user), outcome.
pub const UPDATE_CHANGES_TOTAL: &str = "rota_update_changes_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "rota_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "rota_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "rota_connections_rejected_total";

/// Gauge: events currently on the roster, across all teams.
pub const EVENTS_ACTIVE: &str = "rota_events_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rota_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rota_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "rota_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertTeam { .. } => "insert_team",
        Command::DeleteTeam { .. } => "delete_team",
        Command::InsertUser { .. } => "insert_user",
        Command::DeleteUser { .. } => "delete_user",
        Command::InsertEvent { .. } => "insert_event",
        Command::UpdateEvent { .. } => "update_event",
        Command::DeleteEvent { .. } => "delete_event",
        Command::SelectEvents { .. } => "select_events",
        Command::SelectTeams => "select_teams",
        Command::SelectUsers { .. } => "select_users",
        Command::SelectRoles => "select_roles",
        Command::SelectOverlapping(_) => "select_overlapping",
        Command::SelectCapacity(_) => "select_capacity",
    }
}
