use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests handled. Labels: method, route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "clinicbook_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: method, route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "clinicbook_http_request_duration_seconds";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: appointments booked. Labels: type.
pub const APPOINTMENTS_BOOKED_TOTAL: &str = "clinicbook_appointments_booked_total";

/// Counter: bookings and reschedules rejected for overlapping another appointment.
pub const BOOKING_CONFLICTS_TOTAL: &str = "clinicbook_booking_conflicts_total";

/// Counter: bookings rejected because the patient had no credit left.
pub const INSUFFICIENT_CREDIT_TOTAL: &str = "clinicbook_insufficient_credit_total";

/// Counter: reminder notifications queued by the sweep.
pub const REMINDERS_QUEUED_TOTAL: &str = "clinicbook_reminders_queued_total";

// ── Cache ───────────────────────────────────────────────────────

pub const CACHE_HITS_TOTAL: &str = "clinicbook_cache_hits_total";
pub const CACHE_MISSES_TOTAL: &str = "clinicbook_cache_misses_total";

/// Counter: cache store failures that were swallowed. Labels: op.
pub const CACHE_ERRORS_TOTAL: &str = "clinicbook_cache_errors_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: companies with a loaded engine.
pub const TENANTS_ACTIVE: &str = "clinicbook_tenants_active";

/// Counter: requests rejected by the authentication layer.
pub const AUTH_FAILURES_TOTAL: &str = "clinicbook_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "clinicbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "clinicbook_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
