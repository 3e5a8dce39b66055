//! Lock-free reader and writer task metrics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-reader task counters (no locks on the data path).
#[derive(Debug, Default)]
pub(crate) struct SourceTaskMetrics {
    polls: AtomicU64,
    records: AtomicU64,
    rejected: AtomicU64,
    errors: AtomicU64,
    last_poll_ns: AtomicU64,
}

impl SourceTaskMetrics {
    /// Records a poll that returned `records` rows.
    pub(crate) fn record_poll(&self, records: u64, latency_ns: u64) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.records.fetch_add(records, Ordering::Relaxed);
        self.last_poll_ns.store(latency_ns, Ordering::Relaxed);
    }

    /// Records a row that did not fit the stream schema.
    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a poll error.
    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ReaderMetrics {
        ReaderMetrics {
            polls: self.polls.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_poll_ns: self.last_poll_ns.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of a reader task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderMetrics {
    /// Polls that returned rows.
    pub polls: u64,
    /// Rows returned by the reader.
    pub records: u64,
    /// Rows rejected while binding to the stream schema.
    pub rejected: u64,
    /// Failed polls.
    pub errors: u64,
    /// Latency of the last successful poll in nanoseconds.
    pub last_poll_ns: u64,
}

/// Per-writer task counters.
#[derive(Debug, Default)]
pub(crate) struct SinkTaskMetrics {
    records: AtomicU64,
    errors: AtomicU64,
    flushes: AtomicU64,
}

impl SinkTaskMetrics {
    pub(crate) fn record_write(&self) {
        self.records.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> WriterMetrics {
        WriterMetrics {
            records: self.records.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of a writer task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterMetrics {
    /// Rows handed to the writer successfully.
    pub records: u64,
    /// Failed writes and flushes.
    pub errors: u64,
    /// Successful flushes.
    pub flushes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_snapshot() {
        let m = SourceTaskMetrics::default();
        m.record_poll(5, 1_000);
        m.record_poll(3, 500);
        m.record_rejected();
        m.record_error();
        assert_eq!(
            m.snapshot(),
            ReaderMetrics {
                polls: 2,
                records: 8,
                rejected: 1,
                errors: 1,
                last_poll_ns: 500,
            }
        );
    }

    #[test]
    fn sink_snapshot() {
        let m = SinkTaskMetrics::default();
        m.record_write();
        m.record_write();
        m.record_flush();
        m.record_error();
        assert_eq!(
            m.snapshot(),
            WriterMetrics {
                records: 2,
                errors: 1,
                flushes: 1,
            }
        );
    }
}
