//! # Time Module
//!
//! Event time, watermarks, and the `FLOOR_TIME` bucketing function.
//!
//! ## Concepts
//!
//! - **Event Time**: the `ROWTIME` of a row, nanoseconds since the Unix epoch
//! - **Watermark**: highest event time seen minus the allowed lateness;
//!   windows ending at or before it are complete
//! - **Lateness**: how far behind the maximum seen event time a row may be
//!   and still land in an open window

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime};

use crate::error::{Error, Result};

/// Event time in nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventTime(i64);

impl EventTime {
    /// Creates an event time from epoch nanoseconds.
    #[must_use]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Epoch nanoseconds.
    #[must_use]
    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /// Converts a timestamp value.
    ///
    /// # Errors
    ///
    /// [`Error::TimestampOutOfRange`] outside roughly 1677..2262.
    pub fn from_datetime(ts: NaiveDateTime) -> Result<Self> {
        ts.and_utc()
            .timestamp_nanos_opt()
            .map(Self)
            .ok_or_else(|| Error::TimestampOutOfRange(ts.to_string()))
    }

    /// Converts back to a timestamp value.
    #[must_use]
    pub fn to_datetime(self) -> NaiveDateTime {
        DateTime::from_timestamp_nanos(self.0).naive_utc()
    }

    /// Start of the `length_nanos` bucket containing this instant.
    ///
    /// Buckets are aligned to the epoch; instants before the epoch round
    /// towards negative infinity.
    #[must_use]
    pub const fn floor(self, length_nanos: i64) -> Self {
        Self(self.0 - self.0.rem_euclid(length_nanos))
    }

    /// Adds a span, saturating at the representable range.
    #[must_use]
    pub const fn saturating_add(self, nanos: i64) -> Self {
        Self(self.0.saturating_add(nanos))
    }

    /// Subtracts a span, saturating at the representable range.
    #[must_use]
    pub const fn saturating_sub(self, nanos: i64) -> Self {
        Self(self.0.saturating_sub(nanos))
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime())
    }
}

/// Converts a duration to nanoseconds, rejecting spans beyond `i64`.
///
/// # Errors
///
/// [`Error::InvalidWindow`] if the duration exceeds about 292 years.
pub fn duration_nanos(d: Duration) -> Result<i64> {
    i64::try_from(d.as_nanos())
        .map_err(|_| Error::InvalidWindow(format!("duration {d:?} is too large")))
}

/// `FLOOR_TIME(ts, duration)`: start of the epoch-aligned bucket holding `ts`.
///
/// # Errors
///
/// [`Error::InvalidWindow`] for a zero or oversized duration,
/// [`Error::TimestampOutOfRange`] if `ts` cannot be represented.
pub fn floor_time(ts: NaiveDateTime, duration: Duration) -> Result<NaiveDateTime> {
    let length = duration_nanos(duration)?;
    if length == 0 {
        return Err(Error::InvalidWindow("FLOOR_TIME duration must be positive".into()));
    }
    Ok(EventTime::from_datetime(ts)?.floor(length).to_datetime())
}

/// A watermark indicating event time progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark(EventTime);

impl Watermark {
    /// Creates a new watermark
    #[must_use]
    pub const fn new(time: EventTime) -> Self {
        Self(time)
    }

    /// Gets the watermark time
    #[must_use]
    pub const fn time(self) -> EventTime {
        self.0
    }

    /// Whether a window ending at `window_end` is complete under this watermark.
    #[must_use]
    pub fn closes(self, window_end: EventTime) -> bool {
        window_end <= self.0
    }
}

/// Watermark generator that tracks event time progress
pub trait WatermarkGenerator: Send {
    /// Observes an event time and returns a new watermark if it advanced.
    fn on_event(&mut self, time: EventTime) -> Option<Watermark>;

    /// Current watermark, `None` before the first event.
    fn current(&self) -> Option<Watermark>;

    /// Highest event time observed.
    fn max_event_time(&self) -> Option<EventTime>;

    /// Forgets all progress.
    fn reset(&mut self);
}

/// Watermark trailing the maximum seen event time by a fixed lateness.
#[derive(Debug, Clone)]
pub struct BoundedLatenessGenerator {
    allowed_lateness: i64,
    max_seen: Option<EventTime>,
}

impl BoundedLatenessGenerator {
    /// Creates a generator allowing rows up to `allowed_lateness_nanos` behind.
    #[must_use]
    pub const fn new(allowed_lateness_nanos: i64) -> Self {
        Self {
            allowed_lateness: allowed_lateness_nanos,
            max_seen: None,
        }
    }
}

impl WatermarkGenerator for BoundedLatenessGenerator {
    fn on_event(&mut self, time: EventTime) -> Option<Watermark> {
        if self.max_seen.is_some_and(|max| time <= max) {
            return None;
        }
        self.max_seen = Some(time);
        self.current()
    }

    fn current(&self) -> Option<Watermark> {
        self.max_seen
            .map(|max| Watermark::new(max.saturating_sub(self.allowed_lateness)))
    }

    fn max_event_time(&self) -> Option<EventTime> {
        self.max_seen
    }

    fn reset(&mut self) {
        self.max_seen = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_event_time_round_trips_datetime() {
        let t = ts(13, 0, 10);
        assert_eq!(EventTime::from_datetime(t).unwrap().to_datetime(), t);
    }

    #[test]
    fn test_floor_time() {
        assert_eq!(
            floor_time(ts(13, 0, 9), Duration::from_secs(10)).unwrap(),
            ts(13, 0, 0)
        );
        assert_eq!(
            floor_time(ts(13, 0, 10), Duration::from_secs(10)).unwrap(),
            ts(13, 0, 10)
        );
        assert!(floor_time(ts(13, 0, 10), Duration::ZERO).is_err());
    }

    #[test]
    fn test_floor_before_epoch_rounds_down() {
        let t = EventTime::from_nanos(-1);
        assert_eq!(t.floor(10).as_nanos(), -10);
    }

    #[test]
    fn test_watermark_closes() {
        let wm = Watermark::new(EventTime::from_nanos(1000));
        assert!(wm.closes(EventTime::from_nanos(999)));
        assert!(wm.closes(EventTime::from_nanos(1000)));
        assert!(!wm.closes(EventTime::from_nanos(1001)));
    }

    #[test]
    fn test_bounded_lateness_generator() {
        let mut generator = BoundedLatenessGenerator::new(100);
        assert!(generator.current().is_none());

        let wm1 = generator.on_event(EventTime::from_nanos(1000));
        assert_eq!(wm1, Some(Watermark::new(EventTime::from_nanos(900))));

        // Out of order event - no new watermark
        assert!(generator.on_event(EventTime::from_nanos(800)).is_none());
        assert!(generator.on_event(EventTime::from_nanos(1000)).is_none());

        let wm3 = generator.on_event(EventTime::from_nanos(1200));
        assert_eq!(wm3, Some(Watermark::new(EventTime::from_nanos(1100))));
        assert_eq!(generator.max_event_time(), Some(EventTime::from_nanos(1200)));

        generator.reset();
        assert!(generator.current().is_none());
    }
}
