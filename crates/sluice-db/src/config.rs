//! Configuration for a sluice pipeline.
//!
//! Every field has a default, so a TOML document only names what it
//! changes:
//!
//! ```toml
//! [queue]
//! capacity = 1024
//! overflow = "reject"
//!
//! [worker]
//! io_threads = 4
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sluice_connectors::config::NetTimeouts;
use sluice_core::queue::{OverflowPolicy, QueueConfig};

use crate::error::DbError;

/// Configuration for a [`Pipeline`](crate::Pipeline).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Default shape of in-memory delivery queues.
    pub queue: QueueConfig,
    /// Pump workers.
    pub pump: PumpConfig,
    /// Source reader tasks.
    pub source_reader: SourceReaderConfig,
    /// Sink writer tasks.
    pub sink_writer: SinkWriterConfig,
    /// I/O runtime.
    pub worker: WorkerConfig,
}

/// Pump worker settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PumpConfig {
    /// Capacity of each pump's input buffer; unbounded when absent.
    /// A full inbox blocks the stream feeding it.
    pub inbox_capacity: Option<usize>,
}

impl PumpConfig {
    /// Queue shape of a pump inbox.
    #[must_use]
    pub fn inbox(&self) -> QueueConfig {
        match self.inbox_capacity {
            Some(capacity) => QueueConfig::bounded(capacity, OverflowPolicy::Block),
            None => QueueConfig::unbounded(),
        }
    }
}

/// Source reader task settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceReaderConfig {
    /// Maximum rows taken from a reader per poll.
    pub max_poll_rows: usize,
    /// Poll interval for readers without a readiness signal, in
    /// milliseconds. Also bounds how long a signalled reader sleeps.
    pub fallback_poll_interval_ms: u64,
}

impl Default for SourceReaderConfig {
    fn default() -> Self {
        Self {
            max_poll_rows: 1024,
            fallback_poll_interval_ms: 10,
        }
    }
}

impl SourceReaderConfig {
    /// Fallback poll interval.
    #[must_use]
    pub fn fallback_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fallback_poll_interval_ms)
    }
}

/// Sink writer task settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SinkWriterConfig {
    /// Rows buffered between the sink stream and a network writer.
    pub buffer_capacity: usize,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Per-write timeout in milliseconds.
    pub write_timeout_ms: u64,
    /// Idle flush interval in milliseconds.
    pub flush_interval_ms: u64,
}

impl Default for SinkWriterConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1024,
            connect_timeout_ms: 1_000,
            write_timeout_ms: 100,
            flush_interval_ms: 1_000,
        }
    }
}

impl SinkWriterConfig {
    /// Timeouts handed to network writers.
    #[must_use]
    pub fn timeouts(&self) -> NetTimeouts {
        NetTimeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            io: Duration::from_millis(self.write_timeout_ms),
        }
    }

    /// Idle flush interval.
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Runtime settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Threads of the async runtime driving readers and writers. Pump
    /// workers run on its blocking pool and are not counted here.
    pub io_threads: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { io_threads: 2 }
    }
}

impl EngineConfig {
    /// Parses a TOML document over the defaults and validates it.
    ///
    /// # Errors
    ///
    /// [`DbError::Config`] on malformed TOML, unknown keys or invalid
    /// values.
    pub fn from_toml(text: &str) -> Result<Self, DbError> {
        let config: Self = toml::from_str(text).map_err(|e| DbError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`DbError::Config`] naming the first offending key.
    pub fn validate(&self) -> Result<(), DbError> {
        let zero = |key: &str| Err(DbError::Config(format!("{key} must be greater than zero")));
        if self.queue.capacity == Some(0) {
            return zero("queue.capacity");
        }
        if self.pump.inbox_capacity == Some(0) {
            return zero("pump.inbox_capacity");
        }
        if self.source_reader.max_poll_rows == 0 {
            return zero("source_reader.max_poll_rows");
        }
        if self.source_reader.fallback_poll_interval_ms == 0 {
            return zero("source_reader.fallback_poll_interval_ms");
        }
        if self.sink_writer.buffer_capacity == 0 {
            return zero("sink_writer.buffer_capacity");
        }
        if self.sink_writer.flush_interval_ms == 0 {
            return zero("sink_writer.flush_interval_ms");
        }
        if self.worker.io_threads == 0 {
            return zero("worker.io_threads");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.queue, QueueConfig::unbounded());
        assert_eq!(config.pump.inbox(), QueueConfig::unbounded());
        assert_eq!(config.source_reader.max_poll_rows, 1024);
        assert_eq!(config.worker.io_threads, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_overlays_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            [queue]
            capacity = 8
            overflow = "reject"

            [sink_writer]
            write_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.queue, QueueConfig::bounded(8, OverflowPolicy::Reject));
        assert_eq!(config.sink_writer.timeouts().io, Duration::from_millis(250));
        assert_eq!(config.sink_writer.connect_timeout_ms, 1_000);
        assert_eq!(config.worker, WorkerConfig::default());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = EngineConfig::from_toml("[queue]\nsize = 3\n").unwrap_err();
        assert!(matches!(err, DbError::Config(_)));
    }

    #[test]
    fn test_zero_values_rejected() {
        let err = EngineConfig::from_toml("[worker]\nio_threads = 0\n").unwrap_err();
        assert!(err.to_string().contains("worker.io_threads"));

        let err = EngineConfig::from_toml("[pump]\ninbox_capacity = 0\n").unwrap_err();
        assert!(err.to_string().contains("pump.inbox_capacity"));
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = EngineConfig::default();
        config.pump.inbox_capacity = Some(64);
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(EngineConfig::from_toml(&text).unwrap(), config);
    }
}
