use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "fieldbook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "fieldbook_query_duration_seconds";

// ── Booking domain ──────────────────────────────────────────────

/// Counter: bookings durably created.
pub const BOOKINGS_CREATED_TOTAL: &str = "fieldbook_bookings_created_total";

/// Counter: booking attempts rejected because the slot was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "fieldbook_booking_conflicts_total";

/// Counter: payments moved to SUCCESS. Labels: method.
pub const PAYMENTS_CONFIRMED_TOTAL: &str = "fieldbook_payments_confirmed_total";

/// Counter: gateway callbacks whose amount matched neither encoding.
pub const PAYMENT_AMOUNT_MISMATCH_TOTAL: &str = "fieldbook_payment_amount_mismatch_total";

/// Counter: notifications that could not be delivered.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "fieldbook_notifications_failed_total";

// ── Connections ────────────────────────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "fieldbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "fieldbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "fieldbook_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "fieldbook_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "fieldbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "fieldbook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
/// A failed install is logged; the server runs on without an exporter.
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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertVenue { .. } => "insert_venue",
        Command::InsertField { .. } => "insert_field",
        Command::InsertPriceRule { .. } => "insert_price_rule",
        Command::DeletePriceRule { .. } => "delete_price_rule",
        Command::InsertBooking(_) => "insert_booking",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectBookingHistory { .. } => "select_booking_history",
        Command::SelectUnavailableSlots { .. } => "select_unavailable_slots",
        Command::SelectPaymentRedirect { .. } => "select_payment_redirect",
        Command::InsertCashConfirmation { .. } => "insert_cash_confirmation",
        Command::InsertGatewayConfirmation { .. } => "insert_gateway_confirmation",
        Command::SelectReviewEligibility { .. } => "select_review_eligibility",
    }
}
