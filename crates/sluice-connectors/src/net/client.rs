//! `NET_CLIENT` sink writer.
//!
//! [`NetClientWriter`] connects to a remote TCP server and sends each row
//! of its sink stream as one JSON object per line.

use std::time::Duration;

use async_trait::async_trait;
use sluice_core::{Row, SchemaRef};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::config::{ConnectorState, NetClientOptions, NetTimeouts};
use crate::connector::SinkWriter;
use crate::error::ConnectorError;
use crate::json::row_to_json;
use crate::metrics::{AdapterCounters, ConnectorMetrics};

/// TCP sink writer emitting JSON lines.
pub struct NetClientWriter {
    options: NetClientOptions,
    timeouts: NetTimeouts,
    schema: SchemaRef,
    stream: Option<BufWriter<TcpStream>>,
    state: ConnectorState,
    counters: AdapterCounters,
}

impl NetClientWriter {
    /// Creates an unconnected writer for rows of `schema`.
    #[must_use]
    pub fn new(schema: SchemaRef, options: NetClientOptions, timeouts: NetTimeouts) -> Self {
        Self {
            options,
            timeouts,
            schema,
            stream: None,
            state: ConnectorState::Created,
            counters: AdapterCounters::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectorState {
        self.state
    }

    fn stream(&mut self) -> Result<&mut BufWriter<TcpStream>, ConnectorError> {
        let state = self.state;
        self.stream.as_mut().ok_or_else(|| ConnectorError::InvalidState {
            expected: "Running".into(),
            actual: state.to_string(),
        })
    }
}

async fn with_timeout<T>(
    limit: Duration,
    what: &str,
    fut: impl std::future::Future<Output = std::io::Result<T>>,
) -> Result<T, ConnectorError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(ConnectorError::WriteError(format!("{what}: {e}"))),
        Err(_) => Err(ConnectorError::Timeout(format!("{what} exceeded {limit:?}"))),
    }
}

#[async_trait]
impl SinkWriter for NetClientWriter {
    async fn open(&mut self) -> Result<(), ConnectorError> {
        let address = self.options.remote_address();
        info!(remote = %address, "opening NET_CLIENT sink writer");

        let connected = tokio::time::timeout(self.timeouts.connect, TcpStream::connect(&address)).await;
        let stream = match connected {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.state = ConnectorState::Failed;
                return Err(ConnectorError::ConnectionFailed(format!(
                    "failed to connect to {address}: {e}"
                )));
            }
            Err(_) => {
                self.state = ConnectorState::Failed;
                return Err(ConnectorError::Timeout(format!(
                    "connecting to {address} exceeded {:?}",
                    self.timeouts.connect
                )));
            }
        };
        let _ = stream.set_nodelay(true);

        self.stream = Some(BufWriter::new(stream));
        self.state = ConnectorState::Running;
        Ok(())
    }

    async fn write_row(&mut self, row: &Row) -> Result<(), ConnectorError> {
        let mut line = serde_json::to_vec(&row_to_json(row, &self.schema))?;
        line.push(b'\n');
        let limit = self.timeouts.io;
        let len = line.len() as u64;

        let stream = self.stream()?;
        let result = with_timeout(limit, "write", stream.write_all(&line)).await;
        match result {
            Ok(()) => {
                self.counters.record(len);
                Ok(())
            }
            Err(e) => {
                self.counters.record_error();
                Err(e)
            }
        }
    }

    async fn flush(&mut self) -> Result<(), ConnectorError> {
        let limit = self.timeouts.io;
        let stream = self.stream()?;
        with_timeout(limit, "flush", stream.flush()).await
    }

    fn metrics(&self) -> ConnectorMetrics {
        self.counters.snapshot()
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        if let Some(mut stream) = self.stream.take() {
            let flushed = with_timeout(self.timeouts.io, "flush", stream.flush()).await;
            let _ = stream.shutdown().await;
            debug!(rows = self.counters.snapshot().records_total, "NET_CLIENT sink writer closed");
            flushed?;
        }
        self.state = ConnectorState::Closed;
        Ok(())
    }
}

impl std::fmt::Debug for NetClientWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetClientWriter")
            .field("remote", &self.options.remote_address())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
