//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define server metrics (connections, requests, latency, listeners)
//! - Expose a Prometheus-compatible scrape endpoint when enabled
//!
//! # Metrics
//! - `portico_connections_total` (counter): classified connections by protocol
//! - `portico_connection_errors_total` (counter): failed connections by kind
//! - `portico_requests_total` (counter): requests by status
//! - `portico_request_duration_seconds` (histogram): latency distribution
//! - `portico_listeners` (gauge): running listeners
//! - `portico_reloads_total` (counter): reload attempts by outcome
//!
//! # Design Decisions
//! - Recording is always on; without an installed exporter the `metrics`
//!   macros are no-ops
//! - Low-cardinality labels only

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_connection(protocol: &str) {
    let protocol = if protocol.is_empty() {
        "unspecified".to_owned()
    } else {
        protocol.to_owned()
    };
    counter!("portico_connections_total", "protocol" => protocol).increment(1);
}

pub fn record_connection_error(kind: &'static str) {
    counter!("portico_connection_errors_total", "kind" => kind).increment(1);
}

pub fn record_request(status: u16, start: Instant) {
    counter!("portico_requests_total", "status" => status.to_string()).increment(1);
    histogram!("portico_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn set_listeners(count: usize) {
    gauge!("portico_listeners").set(count as f64);
}

pub fn record_reload(outcome: &'static str) {
    counter!("portico_reloads_total", "outcome" => outcome).increment(1);
}
