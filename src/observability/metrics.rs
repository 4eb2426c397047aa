//! Metrics collection and exposition.
//!
//! # Metrics
//! - `router_requests_total` (counter): proxied HTTP requests by route, status
//! - `router_request_duration_seconds` (histogram): proxied HTTP latency by route
//! - `router_tunnels_total` (counter): CONNECT attempts by branch, outcome
//! - `router_tunnel_bytes_total` (counter): relayed bytes by direction
//! - `router_active_connections` (gauge): current connection count
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(route: &'static str, status: u16, start: Instant) {
    ::metrics::counter!(
        "router_requests_total",
        "route" => route,
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("router_request_duration_seconds", "route" => route)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_tunnel(branch: &'static str, outcome: &'static str) {
    ::metrics::counter!("router_tunnels_total", "branch" => branch, "outcome" => outcome)
        .increment(1);
}

pub fn record_tunnel_bytes(direction: &'static str, bytes: u64) {
    ::metrics::counter!("router_tunnel_bytes_total", "direction" => direction).increment(bytes);
}

pub fn record_active_connections(active: u64) {
    ::metrics::gauge!("router_active_connections").set(active as f64);
}
