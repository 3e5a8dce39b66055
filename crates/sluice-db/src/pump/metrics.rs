//! Lock-free per-pump counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-pump counters, written by the pump worker only.
#[derive(Debug, Default)]
pub(crate) struct PumpMetrics {
    rows_in: AtomicU64,
    rows_out: AtomicU64,
    late_rows: AtomicU64,
    rejected_rows: AtomicU64,
    dropped_rows: AtomicU64,
    windows_emitted: AtomicU64,
    windows_aborted: AtomicU64,
    open_windows: AtomicU64,
}

impl PumpMetrics {
    pub(crate) fn record_input(&self) {
        self.rows_in.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_output(&self, windowed: bool) {
        self.rows_out.fetch_add(1, Ordering::Relaxed);
        if windowed {
            self.windows_emitted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_late(&self) -> u64 {
        self.late_rows.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected_rows.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, n: usize) {
        self.dropped_rows.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_aborted(&self) {
        self.windows_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_open_windows(&self, n: usize) {
        self.open_windows.store(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PumpMetricsSnapshot {
        PumpMetricsSnapshot {
            rows_in: self.rows_in.load(Ordering::Relaxed),
            rows_out: self.rows_out.load(Ordering::Relaxed),
            late_rows: self.late_rows.load(Ordering::Relaxed),
            rejected_rows: self.rejected_rows.load(Ordering::Relaxed),
            dropped_rows: self.dropped_rows.load(Ordering::Relaxed),
            windows_emitted: self.windows_emitted.load(Ordering::Relaxed),
            windows_aborted: self.windows_aborted.load(Ordering::Relaxed),
            open_windows: self.open_windows.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of a pump's counters.
///
/// Counters accumulate across stop and restart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpMetricsSnapshot {
    /// Rows taken from the source stream.
    pub rows_in: u64,
    /// Rows emitted to the target stream.
    pub rows_out: u64,
    /// Rows dropped because their window was already finalized.
    pub late_rows: u64,
    /// Rows rejected by evaluation or validation errors.
    pub rejected_rows: u64,
    /// Output rows refused by full `Reject` queues, counted per queue.
    pub dropped_rows: u64,
    /// Window groups finalized into a row.
    pub windows_emitted: u64,
    /// Window groups discarded by an arithmetic error.
    pub windows_aborted: u64,
    /// `(window, group)` entries currently open.
    pub open_windows: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_updates() {
        let m = PumpMetrics::default();
        m.record_input();
        m.record_input();
        m.record_output(true);
        m.record_output(false);
        assert_eq!(m.record_late(), 1);
        m.record_dropped(2);
        m.set_open_windows(3);
        let snap = m.snapshot();
        assert_eq!(snap.rows_in, 2);
        assert_eq!(snap.rows_out, 2);
        assert_eq!(snap.windows_emitted, 1);
        assert_eq!(snap.late_rows, 1);
        assert_eq!(snap.dropped_rows, 2);
        assert_eq!(snap.open_windows, 3);
    }
}
