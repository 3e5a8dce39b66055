//! `NET_SERVER` source reader.
//!
//! [`NetServerReader`] listens on a TCP port and accepts clients pushing
//! newline-delimited JSON objects. Every client's lines feed one bounded
//! channel drained by `poll_rows()`.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, info, warn};

use crate::config::{ConnectorState, NetServerOptions};
use crate::connector::SourceReader;
use crate::error::ConnectorError;
use crate::metrics::{AdapterCounters, ConnectorMetrics};
use crate::source_row::SourceRow;

/// Lines buffered between client tasks and `poll_rows()`.
const CHANNEL_CAPACITY: usize = 10_000;

/// TCP source reader accepting JSON-lines clients.
pub struct NetServerReader {
    options: NetServerOptions,
    state: ConnectorState,
    rx: Option<mpsc::Receiver<String>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    acceptor_handle: Option<tokio::task::JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    counters: Arc<AdapterCounters>,
    data_ready: Arc<Notify>,
}

impl NetServerReader {
    /// Creates an unopened reader.
    #[must_use]
    pub fn new(options: NetServerOptions) -> Self {
        Self {
            options,
            state: ConnectorState::Created,
            rx: None,
            shutdown_tx: None,
            acceptor_handle: None,
            local_addr: None,
            counters: Arc::new(AdapterCounters::new()),
            data_ready: Arc::new(Notify::new()),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectorState {
        self.state
    }

    /// Bound address once open; resolves port `0`.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Currently connected clients.
    #[must_use]
    pub fn connected_clients(&self) -> u64 {
        self.counters.connected_clients()
    }
}

#[async_trait]
impl SourceReader for NetServerReader {
    async fn open(&mut self) -> Result<(), ConnectorError> {
        let bind_address = self.options.bind_address();
        let max_connections = self.options.max_connections as u64;
        info!(bind = %bind_address, max_connections, "opening NET_SERVER source reader");

        let listener = TcpListener::bind(&bind_address).await.map_err(|e| {
            self.state = ConnectorState::Failed;
            ConnectorError::ConnectionFailed(format!("failed to bind {bind_address}: {e}"))
        })?;
        self.local_addr = listener.local_addr().ok();

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = Arc::clone(&self.counters);
        let data_ready = Arc::clone(&self.data_ready);

        let handle = tokio::spawn(async move {
            let mut shutdown_rx = shutdown_rx;
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let (stream, addr) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => {
                                warn!(error = %e, "accept error");
                                continue;
                            }
                        };
                        if counters.connected_clients() >= max_connections {
                            warn!(addr = %addr, max = max_connections, "rejecting connection: max_connections exceeded");
                            drop(stream);
                            continue;
                        }
                        let _ = stream.set_nodelay(true);

                        let tx = tx.clone();
                        let counters = Arc::clone(&counters);
                        let data_ready = Arc::clone(&data_ready);
                        let mut client_shutdown = shutdown_rx.clone();
                        counters.client_connected();
                        debug!(addr = %addr, "accepted client");

                        tokio::spawn(async move {
                            let mut lines = BufReader::new(stream).lines();
                            loop {
                                tokio::select! {
                                    line = lines.next_line() => match line {
                                        Ok(Some(line)) => {
                                            if line.trim().is_empty() {
                                                continue;
                                            }
                                            if tx.send(line).await.is_err() {
                                                break;
                                            }
                                            data_ready.notify_one();
                                        }
                                        Ok(None) => break,
                                        Err(e) => {
                                            debug!(addr = %addr, error = %e, "client read error");
                                            break;
                                        }
                                    },
                                    _ = client_shutdown.changed() => break,
                                }
                            }
                            counters.client_disconnected();
                            debug!(addr = %addr, "client disconnected");
                        });
                    }
                    _ = shutdown_rx.changed() => {
                        info!("acceptor shutting down");
                        break;
                    }
                }
            }
        });

        self.rx = Some(rx);
        self.shutdown_tx = Some(shutdown_tx);
        self.acceptor_handle = Some(handle);
        self.state = ConnectorState::Running;
        info!(bind = ?self.local_addr, "NET_SERVER source reader started");
        Ok(())
    }

    async fn poll_rows(&mut self, max_rows: usize) -> Result<Option<Vec<SourceRow>>, ConnectorError> {
        if self.state != ConnectorState::Running {
            return Err(ConnectorError::InvalidState {
                expected: "Running".into(),
                actual: self.state.to_string(),
            });
        }
        let rx = self.rx.as_mut().ok_or_else(|| ConnectorError::InvalidState {
            expected: "channel initialized".into(),
            actual: "channel is None".into(),
        })?;

        let mut rows = Vec::new();
        while rows.len() < max_rows {
            let Ok(line) = rx.try_recv() else {
                break;
            };
            match SourceRow::from_json(&line) {
                Ok(row) => {
                    self.counters.record(line.len() as u64);
                    rows.push(row);
                }
                Err(e) => {
                    self.counters.record_error();
                    warn!(error = %e, "discarding undecodable line");
                }
            }
        }

        if rows.is_empty() {
            return Ok(None);
        }
        debug!(records = rows.len(), clients = self.connected_clients(), "polled NET_SERVER rows");
        Ok(Some(rows))
    }

    fn data_ready_notify(&self) -> Option<Arc<Notify>> {
        Some(Arc::clone(&self.data_ready))
    }

    fn metrics(&self) -> ConnectorMetrics {
        self.counters.snapshot()
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        info!("closing NET_SERVER source reader");
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.acceptor_handle.take() {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await;
        }
        self.rx = None;
        self.state = ConnectorState::Closed;
        Ok(())
    }
}

impl std::fmt::Debug for NetServerReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetServerReader")
            .field("state", &self.state)
            .field("local_addr", &self.local_addr)
            .field("connected_clients", &self.connected_clients())
            .finish_non_exhaustive()
    }
}
