//! Metrics collection and exposition.
//!
//! # Metrics
//! - `display_commands_total` (counter): executed operations by name and outcome
//! - `display_command_duration_seconds` (histogram): end-to-end latency incl. retries
//! - `display_command_retries_total` (counter): extra attempts by operation
//! - `display_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `display_pool_connections` (gauge): live connections by state
//! - `display_pool_exhausted_total` (counter): bounded waits that timed out
//! - `display_power_phase` (gauge): numeric power phase per device
//!
//! # Design Decisions
//! - Facade calls are cheap no-ops until `init_metrics` installs a recorder
//! - Labels are endpoint (`host:port`), device name and operation name only

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_command(operation: &str, success: bool, elapsed: Duration) {
    let outcome = if success { "success" } else { "failure" };
    ::metrics::counter!(
        "display_commands_total",
        "operation" => operation.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    ::metrics::histogram!(
        "display_command_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_retry(operation: &str) {
    ::metrics::counter!("display_command_retries_total", "operation" => operation.to_string())
        .increment(1);
}

/// `state` is 0 (closed), 1 (half-open) or 2 (open).
pub fn record_breaker_state(endpoint: &str, state: u8) {
    ::metrics::gauge!("display_circuit_state", "endpoint" => endpoint.to_string())
        .set(f64::from(state));
}

pub fn record_pool(endpoint: &str, total: usize, idle: usize, in_use: usize) {
    for (state, value) in [("total", total), ("idle", idle), ("in_use", in_use)] {
        ::metrics::gauge!(
            "display_pool_connections",
            "endpoint" => endpoint.to_string(),
            "state" => state
        )
        .set(value as f64);
    }
}

pub fn record_pool_exhausted(endpoint: &str) {
    ::metrics::counter!("display_pool_exhausted_total", "endpoint" => endpoint.to_string())
        .increment(1);
}

pub fn record_power_phase(device: &str, phase: u8) {
    ::metrics::gauge!("display_power_phase", "device" => device.to_string()).set(f64::from(phase));
}
