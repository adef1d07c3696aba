//! Metrics collection and exposition.
//!
//! # Metrics
//! - `connect_router_requests_total` (counter): requests by upstream, status
//! - `connect_router_request_duration_seconds` (histogram): latency by upstream
//! - `connect_router_upstream_attempts_total` (counter): transport attempts by upstream, outcome
//!
//! Recording is a no-op until an exporter is installed.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Start the Prometheus scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    metrics::describe_counter!("connect_router_requests_total", "Requests handled, by upstream and status");
    metrics::describe_histogram!(
        "connect_router_request_duration_seconds",
        metrics::Unit::Seconds,
        "Time from request receipt to upstream response headers"
    );
    metrics::describe_counter!(
        "connect_router_upstream_attempts_total",
        "Transport attempts, by upstream and outcome"
    );

    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a finished request. `upstream` is `none` when no route matched.
pub fn record_request(upstream: &str, status: u16, start: Instant) {
    metrics::counter!(
        "connect_router_requests_total",
        "upstream" => upstream.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "connect_router_request_duration_seconds",
        "upstream" => upstream.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

/// Record one transport attempt; `outcome` is `response`, `error`, or `timeout`.
pub fn record_attempt(upstream: &str, outcome: &'static str) {
    metrics::counter!(
        "connect_router_upstream_attempts_total",
        "upstream" => upstream.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}
