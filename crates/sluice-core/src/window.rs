//! # Window Manager
//!
//! Tumbling event-time windows keyed by `(window start, group key)`.
//!
//! Rows are assigned to the epoch-aligned window containing their
//! `ROWTIME`. Each time a row raises the maximum observed event time the
//! watermark moves to `max - allowed_lateness`, and every open window whose
//! end is at or before the watermark is finalized, in ascending
//! `(start, group key)` order.
//!
//! A row whose window has already been finalized is late: it is dropped and
//! counted, never folded into an emitted result.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::error_codes::RowFault;
use crate::time::{
    duration_nanos, BoundedLatenessGenerator, EventTime, Watermark, WatermarkGenerator,
};
use crate::types::Value;

/// Window length and allowed lateness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    length: i64,
    allowed_lateness: i64,
}

impl WindowSpec {
    /// Validates a tumbling window definition.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidWindow`] if `length` is zero or either duration
    /// does not fit in `i64` nanoseconds.
    pub fn new(length: Duration, allowed_lateness: Duration) -> Result<Self> {
        let length = duration_nanos(length)?;
        if length == 0 {
            return Err(Error::InvalidWindow("window length must be positive".into()));
        }
        let allowed_lateness = duration_nanos(allowed_lateness)?;
        Ok(Self {
            length,
            allowed_lateness,
        })
    }

    /// Window length.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn length(&self) -> Duration {
        Duration::from_nanos(self.length as u64)
    }

    /// Allowed lateness.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn allowed_lateness(&self) -> Duration {
        Duration::from_nanos(self.allowed_lateness as u64)
    }

    /// Window length in nanoseconds.
    #[must_use]
    pub const fn length_nanos(&self) -> i64 {
        self.length
    }

    /// Start of the window containing `t`.
    #[must_use]
    pub const fn window_start(&self, t: EventTime) -> EventTime {
        t.floor(self.length)
    }

    /// Exclusive end of the window starting at `start`.
    #[must_use]
    pub const fn window_end(&self, start: EventTime) -> EventTime {
        start.saturating_add(self.length)
    }
}

/// Group-by key: the evaluated group expressions of a row.
///
/// Ordered and compared with [`Value::total_cmp`], so float keys and
/// mixed-width integers behave consistently.
#[derive(Debug, Clone, Default)]
pub struct GroupKey(Vec<Value>);

impl GroupKey {
    /// Wraps evaluated group expressions.
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// The key values, in group-by order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for GroupKey {}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(&other.0) {
            match a.total_cmp(b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

/// Identity of one open window.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct WindowKey {
    /// Inclusive window start.
    pub start: EventTime,
    /// Group within the window.
    pub group: GroupKey,
}

/// Handle to the window a row was assigned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowHandle(WindowKey);

impl WindowHandle {
    /// Key of the assigned window.
    #[must_use]
    pub fn key(&self) -> &WindowKey {
        &self.0
    }
}

/// A window removed from the manager because the watermark passed its end.
#[derive(Debug)]
pub struct ClosedWindow<S> {
    /// Window identity.
    pub key: WindowKey,
    /// Exclusive end of the window.
    pub end: EventTime,
    /// Accumulated state.
    pub state: S,
}

/// Open windows of one pump, with per-window accumulator state `S`.
#[derive(Debug)]
pub struct WindowManager<S> {
    spec: WindowSpec,
    windows: BTreeMap<WindowKey, S>,
    watermark: BoundedLatenessGenerator,
    late_rows: u64,
}

impl<S> WindowManager<S> {
    /// Creates an empty manager.
    #[must_use]
    pub fn new(spec: WindowSpec) -> Self {
        Self {
            spec,
            windows: BTreeMap::new(),
            watermark: BoundedLatenessGenerator::new(spec.allowed_lateness),
            late_rows: 0,
        }
    }

    /// The window definition.
    #[must_use]
    pub fn spec(&self) -> &WindowSpec {
        &self.spec
    }

    /// Assigns a row with `event_time` and `group` to its window.
    ///
    /// # Errors
    ///
    /// [`RowFault::LateRow`] if that window was already finalized. The row
    /// is counted in [`late_rows`](Self::late_rows).
    pub fn assign(&mut self, event_time: EventTime, group: GroupKey) -> std::result::Result<WindowHandle, RowFault> {
        let start = self.spec.window_start(event_time);
        if let Some(wm) = self.watermark.current() {
            if wm.closes(self.spec.window_end(start)) {
                self.late_rows += 1;
                return Err(RowFault::LateRow);
            }
        }
        Ok(WindowHandle(WindowKey { start, group }))
    }

    /// State of the window behind `handle`, created with `init` on first use.
    pub fn state_mut(&mut self, handle: &WindowHandle, init: impl FnOnce() -> S) -> &mut S {
        self.windows.entry(handle.0.clone()).or_insert_with(init)
    }

    /// Records `event_time` and finalizes the windows it completes.
    ///
    /// Only a new maximum event time moves the watermark; older times
    /// return nothing.
    pub fn observe(&mut self, event_time: EventTime) -> Vec<ClosedWindow<S>> {
        match self.watermark.on_event(event_time) {
            Some(wm) => self.close_until(wm),
            None => Vec::new(),
        }
    }

    /// Drains every window whose end is at or before `wm`, ascending by key.
    fn close_until(&mut self, wm: Watermark) -> Vec<ClosedWindow<S>> {
        let ready: Vec<WindowKey> = self
            .windows
            .keys()
            .take_while(|k| wm.closes(self.spec.window_end(k.start)))
            .cloned()
            .collect();

        ready
            .into_iter()
            .filter_map(|key| {
                let state = self.windows.remove(&key)?;
                let end = self.spec.window_end(key.start);
                Some(ClosedWindow { key, end, state })
            })
            .collect()
    }

    /// Current watermark, `None` before the first row.
    #[must_use]
    pub fn watermark(&self) -> Option<Watermark> {
        self.watermark.current()
    }

    /// Number of open `(window, group)` entries.
    #[must_use]
    pub fn open_windows(&self) -> usize {
        self.windows.len()
    }

    /// Rows dropped as late so far.
    #[must_use]
    pub fn late_rows(&self) -> u64 {
        self.late_rows
    }

    /// Discards every open window and the watermark.
    pub fn clear(&mut self) {
        self.windows.clear();
        self.watermark.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: i64 = 1_000_000_000;

    fn t(secs: i64) -> EventTime {
        EventTime::from_nanos(secs * SEC)
    }

    fn key(s: &str) -> GroupKey {
        GroupKey::new(vec![Value::from(s)])
    }

    fn manager(len: u64, late: u64) -> WindowManager<Vec<i64>> {
        WindowManager::new(
            WindowSpec::new(Duration::from_secs(len), Duration::from_secs(late)).unwrap(),
        )
    }

    fn ingest(m: &mut WindowManager<Vec<i64>>, secs: i64, group: &str, v: i64) -> Vec<ClosedWindow<Vec<i64>>> {
        let handle = m.assign(t(secs), key(group)).unwrap();
        m.state_mut(&handle, Vec::new).push(v);
        m.observe(t(secs))
    }

    #[test]
    fn rejects_zero_length() {
        assert!(WindowSpec::new(Duration::ZERO, Duration::ZERO).is_err());
        assert!(WindowSpec::new(Duration::from_secs(1), Duration::ZERO).is_ok());
    }

    #[test]
    fn window_closes_when_watermark_reaches_end() {
        let mut m = manager(10, 1);
        assert!(ingest(&mut m, 0, "a", 10).is_empty());
        assert!(ingest(&mut m, 9, "a", 30).is_empty());
        // watermark 9 < end 10
        assert!(ingest(&mut m, 10, "a", 40).is_empty());
        // watermark 10 == end 10
        let closed = ingest(&mut m, 11, "a", 50);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].key.start, t(0));
        assert_eq!(closed[0].end, t(10));
        assert_eq!(closed[0].state, vec![10, 30]);
        assert_eq!(m.open_windows(), 1);
    }

    #[test]
    fn emits_in_start_then_group_order() {
        let mut m = manager(2, 0);
        let mut closed = Vec::new();
        for (secs, group) in [(0, "ORCL"), (1, "GOOGL"), (1, "ORCL"), (2, "ORCL"), (5, "ORCL")] {
            closed.extend(ingest(&mut m, secs, group, secs));
        }
        let order: Vec<_> = closed
            .iter()
            .map(|c| (c.key.start, c.key.group.values()[0].clone()))
            .collect();
        assert_eq!(
            order,
            vec![
                (t(0), Value::from("GOOGL")),
                (t(0), Value::from("ORCL")),
                (t(2), Value::from("ORCL")),
            ]
        );
    }

    #[test]
    fn late_rows_are_dropped_and_counted() {
        let mut m = manager(10, 0);
        ingest(&mut m, 1, "a", 1);
        let closed = ingest(&mut m, 10, "a", 2);
        assert_eq!(closed.len(), 1);

        assert_eq!(m.assign(t(5), key("a")), Err(RowFault::LateRow));
        assert_eq!(m.late_rows(), 1);
    }

    #[test]
    fn out_of_order_within_lateness_is_accepted() {
        let mut m = manager(10, 5);
        ingest(&mut m, 12, "a", 1);
        // watermark 7, window [0, 10) still open
        let closed = ingest(&mut m, 3, "a", 2);
        assert!(closed.is_empty());
        let closed = ingest(&mut m, 15, "a", 3);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].state, vec![2]);
    }

    #[test]
    fn clear_resets_state() {
        let mut m = manager(10, 0);
        ingest(&mut m, 25, "a", 1);
        m.clear();
        assert_eq!(m.open_windows(), 0);
        assert!(m.watermark().is_none());
        assert!(m.assign(t(0), key("a")).is_ok());
    }

    #[test]
    fn float_group_keys_compare_totally() {
        let a = GroupKey::new(vec![Value::Float(f32::NAN)]);
        let b = GroupKey::new(vec![Value::Float(f32::NAN)]);
        assert_eq!(a, b);
        assert!(GroupKey::new(vec![Value::Integer(1)]) < GroupKey::new(vec![Value::BigInt(2)]));
    }
}
