//! Reader and writer traits implemented by every adapter.

use std::sync::Arc;

use async_trait::async_trait;
use sluice_core::Row;
use tokio::sync::Notify;

use crate::error::ConnectorError;
use crate::metrics::ConnectorMetrics;
use crate::source_row::SourceRow;

/// Pulls rows from an external system into a source stream.
///
/// The engine drives a reader from a single task: `open`, then repeated
/// `poll_rows`, then `close`. `poll_rows` must not block; readers that
/// receive data asynchronously expose a [`Notify`] so the task can sleep
/// until something arrives.
#[async_trait]
pub trait SourceReader: Send {
    /// Binds or connects.
    async fn open(&mut self) -> Result<(), ConnectorError>;

    /// Returns up to `max_rows` buffered rows, `None` when nothing is ready.
    async fn poll_rows(&mut self, max_rows: usize) -> Result<Option<Vec<SourceRow>>, ConnectorError>;

    /// Signalled when new data may be available.
    fn data_ready_notify(&self) -> Option<Arc<Notify>> {
        None
    }

    /// Counter snapshot.
    fn metrics(&self) -> ConnectorMetrics {
        ConnectorMetrics::default()
    }

    /// Releases external resources.
    async fn close(&mut self) -> Result<(), ConnectorError>;
}

/// Pushes rows of a sink stream to an external system.
#[async_trait]
pub trait SinkWriter: Send {
    /// Connects.
    async fn open(&mut self) -> Result<(), ConnectorError>;

    /// Sends one row; may buffer until [`flush`](Self::flush).
    async fn write_row(&mut self, row: &Row) -> Result<(), ConnectorError>;

    /// Sends anything buffered.
    async fn flush(&mut self) -> Result<(), ConnectorError>;

    /// Counter snapshot.
    fn metrics(&self) -> ConnectorMetrics {
        ConnectorMetrics::default()
    }

    /// Flushes and disconnects.
    async fn close(&mut self) -> Result<(), ConnectorError>;
}
