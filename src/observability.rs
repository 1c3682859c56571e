use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: method, route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "bookings_http_requests_total";

/// Histogram: request latency in seconds. Labels: method, route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "bookings_http_request_duration_seconds";

/// Counter: POSTs rejected for a missing or wrong CSRF token.
pub const CSRF_REJECTIONS_TOTAL: &str = "bookings_csrf_rejections_total";

/// Counter: failed owner logins.
pub const LOGIN_FAILURES_TOTAL: &str = "bookings_login_failures_total";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: reservations written.
pub const RESERVATIONS_CREATED_TOTAL: &str = "bookings_reservations_created_total";

/// Counter: owner blocks added from the calendar.
pub const BLOCKS_ADDED_TOTAL: &str = "bookings_blocks_added_total";

/// Counter: owner blocks removed from the calendar.
pub const BLOCKS_REMOVED_TOTAL: &str = "bookings_blocks_removed_total";

/// Counter: messages handed to the mail transport.
pub const MAIL_SENT_TOTAL: &str = "bookings_mail_sent_total";

/// Counter: messages dropped or failed in delivery.
pub const MAIL_FAILED_TOTAL: &str = "bookings_mail_failed_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: live sessions after the last purge.
pub const SESSIONS_ACTIVE: &str = "bookings_sessions_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bookings_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "bookings_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "bookings_wal_compactions_total";

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

/// Count and time every request by its route pattern, so `/choose-room/1`
/// and `/choose-room/2` share a series.
pub async fn track_metrics(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "route" => route.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "route" => route)
        .record(started.elapsed().as_secs_f64());
    response
}
