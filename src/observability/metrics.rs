//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by mode, status
//! - `gateway_request_duration_seconds` (histogram): request latency
//! - `gateway_invocations_total` (counter): sandbox invocations by locality, outcome
//! - `gateway_invocation_duration_seconds` (histogram): invocation latency by locality
//! - `gateway_active_connections` (gauge): current connection count
//! - `gateway_deadline_expired_total` (counter): connections closed by the deadline guard
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::cluster::LocalityId;
use crate::config::GatewayMode;

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe();
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

fn describe() {
    describe_counter!("gateway_requests_total", "HTTP requests answered");
    describe_histogram!(
        "gateway_request_duration_seconds",
        "Time from request head to response head"
    );
    describe_counter!("gateway_invocations_total", "Sandbox invocations");
    describe_histogram!(
        "gateway_invocation_duration_seconds",
        "Sandbox invocation latency"
    );
    describe_gauge!("gateway_active_connections", "Open client connections");
    describe_counter!(
        "gateway_deadline_expired_total",
        "Connections closed by the deadline guard"
    );
}

/// Record a completed request.
pub fn record_request(mode: GatewayMode, status: u16, start: Instant) {
    counter!(
        "gateway_requests_total",
        "mode" => mode.as_str(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "mode" => mode.as_str())
        .record(start.elapsed().as_secs_f64());
}

/// Record a finished sandbox invocation.
pub fn record_invocation(locality: LocalityId, outcome: &'static str, start: Instant) {
    counter!(
        "gateway_invocations_total",
        "locality" => locality.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "gateway_invocation_duration_seconds",
        "locality" => locality.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn set_active_connections(count: u64) {
    gauge!("gateway_active_connections").set(count as f64);
}

pub fn record_deadline_expired() {
    counter!("gateway_deadline_expired_total").increment(1);
}
