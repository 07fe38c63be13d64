//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_upgrades_total` (counter): handshakes by outcome
//! - `gateway_handshake_duration_seconds` (histogram): time to upgrade
//! - `gateway_admission_rejected_total` (counter): connections refused by the limiter
//! - `gateway_admission_capacity` (gauge): current limiter ceiling
//! - `gateway_active_links` (gauge): established links
//! - `gateway_messages_total` (counter): messages by direction
//! - `gateway_compression_negotiated_total` (counter): by result
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exposition is opt-in via configuration

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a finished handshake.
pub fn record_upgrade(outcome: &'static str, start: Instant) {
    counter!("gateway_upgrades_total", "outcome" => outcome).increment(1);
    histogram!("gateway_handshake_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_admission_rejected() {
    counter!("gateway_admission_rejected_total").increment(1);
}

pub fn record_admission_capacity(capacity: u64) {
    gauge!("gateway_admission_capacity").set(capacity as f64);
}

pub fn record_active_links(count: u64) {
    gauge!("gateway_active_links").set(count as f64);
}

pub fn record_message(direction: &'static str) {
    counter!("gateway_messages_total", "direction" => direction).increment(1);
}

pub fn record_compression(negotiated: bool) {
    let result = if negotiated { "accepted" } else { "declined" };
    counter!("gateway_compression_negotiated_total", "result" => result).increment(1);
}
