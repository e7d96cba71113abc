// src/core/metrics.rs

//! Defines and registers Prometheus metrics for connection-layer monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Server-wide Gauges ---
    /// The number of clients currently connected to the server.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("ldapgate_connected_clients", "Number of currently connected clients.").unwrap();
    /// The number of operations admitted and not yet answered.
    pub static ref OPERATIONS_IN_PROGRESS: Gauge =
        register_gauge!("ldapgate_operations_in_progress", "Number of admitted operations awaiting a response.").unwrap();

    // --- Server-wide Counters ---
    /// The total number of connections accepted by the server since startup.
    pub static ref CONNECTIONS_ACCEPTED_TOTAL: Counter =
        register_counter!("ldapgate_connections_accepted_total", "Total number of connections accepted.").unwrap();
    /// Disconnects, labeled by the reason the connection was closed.
    pub static ref DISCONNECTS_TOTAL: CounterVec =
        register_counter_vec!("ldapgate_disconnects_total", "Total number of disconnects, labeled by reason.", &["reason"]).unwrap();
    /// Requests read from clients, labeled by operation type.
    pub static ref OPERATIONS_TOTAL: CounterVec =
        register_counter_vec!("ldapgate_operations_total", "Total number of requests received, labeled by type.", &["type"]).unwrap();
    /// Requests abandoned or cancelled by clients.
    pub static ref ABANDONED_OPERATIONS_TOTAL: Counter =
        register_counter!("ldapgate_abandoned_operations_total", "Total number of abandon requests that reached an operation.").unwrap();
    pub static ref BYTES_READ_TOTAL: Counter =
        register_counter!("ldapgate_bytes_read_total", "Total number of bytes read from client sockets.").unwrap();
    pub static ref BYTES_WRITTEN_TOTAL: Counter =
        register_counter!("ldapgate_bytes_written_total", "Total number of bytes written to client sockets.").unwrap();

    // --- Histograms ---
    /// Time from admission to response delivery.
    pub static ref OPERATION_LATENCY_SECONDS: Histogram =
        register_histogram!("ldapgate_operation_latency_seconds", "Latency from admission to response in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# failed to encode metrics: {e}\n"))
}
