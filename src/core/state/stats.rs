// src/core/state/stats.rs

//! Per-listener LDAP traffic statistics.

use crate::core::metrics;
use crate::core::operation::OperationKind;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use strum::IntoEnumIterator;

const KIND_COUNT: usize = 10;

fn kind_index(kind: OperationKind) -> usize {
    kind as usize
}

/// Holds the counters for one listener.
///
/// The Prometheus metrics are always updated. The local counters are only
/// maintained when statistics are enabled for the listener.
#[derive(Debug)]
pub struct LdapStatistics {
    enabled: AtomicBool,
    connections_established: AtomicU64,
    connections_closed: AtomicU64,
    messages_read: AtomicU64,
    messages_written: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    abandoned_operations: AtomicU64,
    requests: [AtomicU64; KIND_COUNT],
}

/// A point-in-time copy of the counters, for the monitoring endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub connections_established: u64,
    pub connections_closed: u64,
    pub messages_read: u64,
    pub messages_written: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub abandoned_operations: u64,
    pub requests: Vec<(OperationKind, u64)>,
}

impl LdapStatistics {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            connections_established: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            messages_read: AtomicU64::new(0),
            messages_written: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            abandoned_operations: AtomicU64::new(0),
            requests: Default::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn bump(&self, counter: &AtomicU64, by: u64) {
        if self.is_enabled() {
            counter.fetch_add(by, Ordering::Relaxed);
        }
    }

    pub fn update_connect(&self) {
        metrics::CONNECTIONS_ACCEPTED_TOTAL.inc();
        metrics::CONNECTED_CLIENTS.inc();
        self.bump(&self.connections_established, 1);
    }

    pub fn update_disconnect(&self) {
        metrics::CONNECTED_CLIENTS.dec();
        self.bump(&self.connections_closed, 1);
    }

    pub fn update_message_read(&self, kind: OperationKind) {
        metrics::OPERATIONS_TOTAL
            .with_label_values(&[kind.as_ref()])
            .inc();
        self.bump(&self.messages_read, 1);
        self.bump(&self.requests[kind_index(kind)], 1);
    }

    pub fn update_message_written(&self) {
        self.bump(&self.messages_written, 1);
    }

    pub fn update_bytes_read(&self, n: usize) {
        metrics::BYTES_READ_TOTAL.inc_by(n as f64);
        self.bump(&self.bytes_read, n as u64);
    }

    pub fn update_bytes_written(&self, n: usize) {
        metrics::BYTES_WRITTEN_TOTAL.inc_by(n as f64);
        self.bump(&self.bytes_written, n as u64);
    }

    pub fn update_abandoned_operation(&self) {
        metrics::ABANDONED_OPERATIONS_TOTAL.inc();
        self.bump(&self.abandoned_operations, 1);
    }

    pub fn requests(&self, kind: OperationKind) -> u64 {
        self.requests[kind_index(kind)].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatisticsSnapshot {
            connections_established: load(&self.connections_established),
            connections_closed: load(&self.connections_closed),
            messages_read: load(&self.messages_read),
            messages_written: load(&self.messages_written),
            bytes_read: load(&self.bytes_read),
            bytes_written: load(&self.bytes_written),
            abandoned_operations: load(&self.abandoned_operations),
            requests: OperationKind::iter()
                .map(|kind| (kind, self.requests(kind)))
                .collect(),
        }
    }
}
