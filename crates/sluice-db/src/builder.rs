//! Fluent builder for [`Pipeline`] construction.

use std::time::Duration;

use sluice_core::queue::OverflowPolicy;

use crate::config::EngineConfig;
use crate::error::DbError;
use crate::pipeline::Pipeline;

/// Fluent builder for constructing a [`Pipeline`].
///
/// # Example
///
/// ```rust,ignore
/// let pipeline = Pipeline::builder()
///     .queue_capacity(1024)
///     .overflow(OverflowPolicy::Reject)
///     .io_threads(4)
///     .build()?;
/// ```
pub struct PipelineBuilder {
    config: EngineConfig,
}

impl PipelineBuilder {
    /// Create a new builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Start from a TOML document.
    ///
    /// # Errors
    ///
    /// [`DbError::Config`] on malformed TOML or invalid values.
    pub fn from_toml(text: &str) -> Result<Self, DbError> {
        Ok(Self {
            config: EngineConfig::from_toml(text)?,
        })
    }

    /// Default capacity of in-memory queues.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue.capacity = Some(capacity);
        self
    }

    /// What a full in-memory queue does to producers.
    #[must_use]
    pub fn overflow(mut self, policy: OverflowPolicy) -> Self {
        self.config.queue.overflow = policy;
        self
    }

    /// Bound each pump's inbox.
    #[must_use]
    pub fn pump_inbox_capacity(mut self, capacity: usize) -> Self {
        self.config.pump.inbox_capacity = Some(capacity);
        self
    }

    /// Rows taken from a reader per poll.
    #[must_use]
    pub fn max_poll_rows(mut self, rows: usize) -> Self {
        self.config.source_reader.max_poll_rows = rows;
        self
    }

    /// Poll interval for readers without a data-ready signal.
    #[must_use]
    pub fn fallback_poll_interval(mut self, interval: Duration) -> Self {
        self.config.source_reader.fallback_poll_interval_ms =
            u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Threads of the I/O runtime.
    #[must_use]
    pub fn io_threads(mut self, threads: usize) -> Self {
        self.config.worker.io_threads = threads;
        self
    }

    /// Rows buffered ahead of each network writer.
    #[must_use]
    pub fn sink_buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.sink_writer.buffer_capacity = capacity;
        self
    }

    /// Build the pipeline.
    ///
    /// # Errors
    ///
    /// Invalid configuration, or the runtime could not be started.
    pub fn build(self) -> Result<Pipeline, DbError> {
        Pipeline::with_config(self.config)
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("config", &self.config)
            .finish()
    }
}
