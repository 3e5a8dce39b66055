//! `IN_MEMORY_QUEUE` source reader.
//!
//! The embedding application pushes [`SourceRow`]s into a named
//! [`DeliveryQueue`]; the reader drains it without blocking and wakes the
//! source task through the queue's readiness notification.

use std::sync::Arc;

use async_trait::async_trait;
use sluice_core::queue::{DeliveryQueue, QueueError};
use tokio::sync::Notify;
use tracing::debug;

use crate::config::ConnectorState;
use crate::connector::SourceReader;
use crate::error::ConnectorError;
use crate::metrics::{AdapterCounters, ConnectorMetrics};
use crate::source_row::SourceRow;

/// Reader draining an in-process push queue.
#[derive(Debug)]
pub struct InMemoryQueueReader {
    name: String,
    queue: Arc<DeliveryQueue<SourceRow>>,
    state: ConnectorState,
    counters: AdapterCounters,
}

impl InMemoryQueueReader {
    /// Creates a reader over `queue`.
    #[must_use]
    pub fn new(name: impl Into<String>, queue: Arc<DeliveryQueue<SourceRow>>) -> Self {
        Self {
            name: name.into(),
            queue,
            state: ConnectorState::Created,
            counters: AdapterCounters::new(),
        }
    }

    /// Queue name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectorState {
        self.state
    }
}

#[async_trait]
impl SourceReader for InMemoryQueueReader {
    async fn open(&mut self) -> Result<(), ConnectorError> {
        self.state = ConnectorState::Running;
        debug!(queue = %self.name, "in-memory source queue opened");
        Ok(())
    }

    async fn poll_rows(&mut self, max_rows: usize) -> Result<Option<Vec<SourceRow>>, ConnectorError> {
        if self.state != ConnectorState::Running {
            return Err(ConnectorError::InvalidState {
                expected: "Running".into(),
                actual: self.state.to_string(),
            });
        }

        let mut rows = Vec::new();
        while rows.len() < max_rows {
            match self.queue.try_pop() {
                Ok(Some(row)) => {
                    self.counters.record(0);
                    rows.push(row);
                }
                Ok(None) => break,
                Err(QueueError::Closed) if rows.is_empty() => {
                    self.state = ConnectorState::Closed;
                    return Err(ConnectorError::InvalidState {
                        expected: "Running".into(),
                        actual: "queue closed".into(),
                    });
                }
                Err(_) => break,
            }
        }

        Ok(if rows.is_empty() { None } else { Some(rows) })
    }

    fn data_ready_notify(&self) -> Option<Arc<Notify>> {
        Some(self.queue.ready_notify())
    }

    fn metrics(&self) -> ConnectorMetrics {
        self.counters.snapshot()
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        self.queue.close();
        self.state = ConnectorState::Closed;
        debug!(queue = %self.name, "in-memory source queue closed");
        Ok(())
    }
}
