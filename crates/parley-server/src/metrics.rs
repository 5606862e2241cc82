//! Prometheus metrics for the chat server.

use anyhow::Result;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{debug, info};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "parley_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "parley_connections_active";
    pub const MESSAGES_TOTAL: &str = "parley_messages_total";
    pub const MESSAGES_BYTES: &str = "parley_messages_bytes";
    pub const ROOMS_ACTIVE: &str = "parley_rooms_active";
    pub const LATENCY_SECONDS: &str = "parley_latency_seconds";
    pub const ERRORS_TOTAL: &str = "parley_errors_total";
}

const COUNTERS: [(&str, &str); 4] = [
    (names::CONNECTIONS_TOTAL, "WebSocket sessions opened since start"),
    (names::MESSAGES_TOTAL, "WebSocket frames, labelled by direction"),
    (names::MESSAGES_BYTES, "WebSocket payload bytes, labelled by direction"),
    (names::ERRORS_TOTAL, "Errors, labelled by type"),
];

const GAUGES: [(&str, &str); 2] = [
    (names::CONNECTIONS_ACTIVE, "Open WebSocket sessions"),
    (names::ROOMS_ACTIVE, "Rooms with at least one member"),
];

/// Register metric descriptions with the installed recorder.
///
/// Descriptions sent before a recorder is installed are discarded.
pub fn describe_metrics() {
    for (name, help) in COUNTERS {
        metrics::describe_counter!(name, help);
    }
    for (name, help) in GAUGES {
        metrics::describe_gauge!(name, help);
    }
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        metrics::Unit::Seconds,
        "Time to handle one inbound frame"
    );

    debug!("metric descriptions registered");
}

/// Install the Prometheus exporter on `0.0.0.0:port` and describe the
/// metrics to it.
///
/// # Errors
///
/// Fails if the recorder is already installed or the listener cannot bind.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

/// Count one frame of `bytes` in the given direction (`inbound`/`outbound`).
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

pub fn record_error(kind: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => kind).increment(1);
}

/// Tracks one WebSocket session in the connection metrics for as long as
/// it is alive.
#[must_use]
pub struct SessionMetrics(());

impl SessionMetrics {
    pub fn start() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
        Self(())
    }
}

impl Drop for SessionMetrics {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}
