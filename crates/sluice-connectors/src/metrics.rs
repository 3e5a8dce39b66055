//! Adapter counters.
//!
//! [`AdapterCounters`] holds lock-free counters updated on the hot path;
//! [`ConnectorMetrics`] is the plain snapshot handed to callers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time adapter statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectorMetrics {
    /// Rows read or written.
    pub records_total: u64,
    /// Raw payload bytes read or written.
    pub bytes_total: u64,
    /// Payloads that failed to decode or send.
    pub errors_total: u64,
    /// Currently connected peers (server readers only).
    pub connected_clients: u64,
}

/// Atomic counters for one adapter.
///
/// All counters use `Relaxed` ordering; snapshots are for monitoring.
#[derive(Debug, Default)]
pub struct AdapterCounters {
    records: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
    connected_clients: AtomicU64,
}

impl AdapterCounters {
    /// All counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one row of `bytes` payload.
    pub fn record(&self, bytes: u64) {
        self.records.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records a decode or send failure.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A peer connected.
    pub fn client_connected(&self) {
        self.connected_clients.fetch_add(1, Ordering::Relaxed);
    }

    /// A peer disconnected.
    pub fn client_disconnected(&self) {
        self.connected_clients.fetch_sub(1, Ordering::Relaxed);
    }

    /// Current number of connected peers.
    #[must_use]
    pub fn connected_clients(&self) -> u64 {
        self.connected_clients.load(Ordering::Relaxed)
    }

    /// Snapshot of every counter.
    #[must_use]
    pub fn snapshot(&self) -> ConnectorMetrics {
        ConnectorMetrics {
            records_total: self.records.load(Ordering::Relaxed),
            bytes_total: self.bytes.load(Ordering::Relaxed),
            errors_total: self.errors.load(Ordering::Relaxed),
            connected_clients: self.connected_clients.load(Ordering::Relaxed),
        }
    }
}
