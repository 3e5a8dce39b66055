//! Per-reader tokio task with exclusive ownership of its reader.
//!
//! The task opens the reader, then alternates between waiting for data and
//! polling. It sleeps on the reader's `data_ready_notify()` handle when the
//! reader has one, falling back to a timer otherwise. Polled rows are bound
//! to the stream schema and dispatched to the stream's consumers; rows that
//! do not fit are counted and skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, warn};

use sluice_connectors::{ConnectorError, SourceReader};
use sluice_core::diagnostics::{ErrorCell, LastError};
use sluice_core::Row;

use crate::catalog::StreamEntry;
use crate::config::SourceReaderConfig;
use crate::error::DbError;
use crate::metrics::{ReaderMetrics, SourceTaskMetrics};

/// How long shutdown waits for the task to close its reader.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle returned when a source task is spawned.
pub(crate) struct SourceTaskHandle {
    name: String,
    shutdown: Arc<Notify>,
    stop: Arc<AtomicBool>,
    metrics: Arc<SourceTaskMetrics>,
    errors: Arc<ErrorCell>,
    done: Option<mpsc::Receiver<()>>,
}

impl SourceTaskHandle {
    pub(crate) fn metrics(&self) -> ReaderMetrics {
        self.metrics.snapshot()
    }

    pub(crate) fn last_error(&self) -> Option<LastError> {
        self.errors.last()
    }

    /// Signals the task and waits for it to close the reader.
    pub(crate) fn shutdown(&mut self) {
        let Some(done) = self.done.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        self.shutdown.notify_one();
        if let Err(mpsc::RecvTimeoutError::Timeout) = done.recv_timeout(SHUTDOWN_TIMEOUT) {
            warn!(reader = %self.name, "source task did not stop in time");
        }
    }
}

impl Drop for SourceTaskHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawns a task that opens `reader` and feeds `stream` from it.
///
/// Returns once the reader is open.
///
/// # Errors
///
/// The reader failed to open; no task keeps running.
pub(crate) fn spawn_source_task(
    runtime: &Handle,
    name: String,
    mut reader: Box<dyn SourceReader>,
    stream: Arc<StreamEntry>,
    config: &SourceReaderConfig,
) -> Result<SourceTaskHandle, DbError> {
    let shutdown = Arc::new(Notify::new());
    let shutdown_rx = Arc::clone(&shutdown);
    let stop = Arc::new(AtomicBool::new(false));
    let stop_rx = Arc::clone(&stop);
    let metrics = Arc::new(SourceTaskMetrics::default());
    let metrics_tx = Arc::clone(&metrics);
    let errors = Arc::new(ErrorCell::new());
    let errors_tx = Arc::clone(&errors);
    let max_poll = config.max_poll_rows;
    let fallback_interval = config.fallback_poll_interval();
    let (opened_tx, opened_rx) = mpsc::sync_channel::<Result<(), ConnectorError>>(1);
    let (done_tx, done) = mpsc::channel::<()>();
    let task_name = name.clone();

    runtime.spawn(async move {
        let _done = done_tx;
        let name = task_name;
        if let Err(e) = reader.open().await {
            let _ = opened_tx.send(Err(e));
            return;
        }
        let _ = opened_tx.send(Ok(()));
        debug!(reader = %name, stream = %stream.name(), "source task started");

        let data_notify = reader.data_ready_notify();
        let mut backlog = false;
        loop {
            if !backlog {
                tokio::select! {
                    biased;

                    () = shutdown_rx.notified() => break,

                    () = wait_for_data(data_notify.as_ref(), fallback_interval) => {}
                }
            }
            if stop_rx.load(Ordering::Acquire) {
                break;
            }

            let poll_start = Instant::now();
            match reader.poll_rows(max_poll).await {
                Ok(Some(batch)) => {
                    backlog = batch.len() >= max_poll;
                    #[allow(clippy::cast_possible_truncation)]
                    let latency_ns = poll_start.elapsed().as_nanos() as u64;
                    metrics_tx.record_poll(batch.len() as u64, latency_ns);

                    let rows: Vec<Row> = batch
                        .into_iter()
                        .filter_map(|source_row| match source_row.into_row(stream.schema()) {
                            Ok(row) => Some(row),
                            Err(e) => {
                                metrics_tx.record_rejected();
                                warn!(reader = %name, error = %e, "row rejected");
                                errors_tx.record(&e);
                                None
                            }
                        })
                        .collect();

                    // Dispatch may block on a full downstream queue.
                    let cancelled = tokio::task::block_in_place(|| {
                        rows.iter().any(|row| stream.dispatch(row, &stop_rx).cancelled)
                    });
                    if cancelled {
                        break;
                    }
                }
                Ok(None) => backlog = false,
                Err(ConnectorError::InvalidState { actual, .. }) => {
                    debug!(reader = %name, state = %actual, "reader no longer running");
                    break;
                }
                Err(e) => {
                    backlog = false;
                    metrics_tx.record_error();
                    warn!(reader = %name, error = %e, "source poll error");
                    errors_tx.record(&e);
                }
            }
        }

        if let Err(e) = reader.close().await {
            warn!(reader = %name, error = %e, "reader close failed");
        }
        debug!(reader = %name, "source task stopped");
    });

    match opened_rx.recv() {
        Ok(Ok(())) => Ok(SourceTaskHandle {
            name,
            shutdown,
            stop,
            metrics,
            errors,
            done: Some(done),
        }),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(DbError::Shutdown),
    }
}

/// Awaits the reader's `Notify` handle if present, otherwise sleeps for
/// `fallback`. A signalled wait is also capped at `fallback`.
async fn wait_for_data(notify: Option<&Arc<Notify>>, fallback: Duration) {
    match notify {
        Some(n) => {
            let _ = tokio::time::timeout(fallback, n.notified()).await;
        }
        None => tokio::time::sleep(fallback).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::definition::StreamDefinition;
    use sluice_connectors::memory::InMemoryQueueReader;
    use sluice_connectors::SourceRow;
    use sluice_core::queue::{DeliveryQueue, QueueConfig};
    use sluice_core::{ColumnDef, SqlType, Value};

    fn stream() -> Arc<StreamEntry> {
        Catalog::new()
            .add_stream(&StreamDefinition::source(
                "in",
                vec![ColumnDef::new("n", SqlType::Integer).not_null()],
            ))
            .unwrap()
    }

    fn config() -> SourceReaderConfig {
        SourceReaderConfig {
            max_poll_rows: 2,
            fallback_poll_interval_ms: 5,
        }
    }

    #[test]
    fn test_source_task_dispatches_rows() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let stream = stream();
        let sink = Arc::new(DeliveryQueue::new(QueueConfig::unbounded()));
        stream.attach("test", Arc::clone(&sink));

        let queue = Arc::new(DeliveryQueue::new(QueueConfig::unbounded()));
        let reader = Box::new(InMemoryQueueReader::new("q", Arc::clone(&queue)));
        let mut handle = spawn_source_task(
            runtime.handle(),
            "r".into(),
            reader,
            Arc::clone(&stream),
            &config(),
        )
        .unwrap();

        for n in 0..5 {
            let row = SourceRow::builder().add_column("n", n).unwrap().build();
            queue.push(row).unwrap();
        }
        let bad = SourceRow::builder().add_column("other", 1_i32).unwrap().build();
        queue.push(bad).unwrap();

        for n in 0..5 {
            let row = sink.pop_blocking().unwrap();
            assert_eq!(row.values(), &[Value::Integer(n)]);
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.metrics().rejected == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let snap = handle.metrics();
        assert_eq!(snap.records, 6);
        assert_eq!(snap.rejected, 1);
        assert!(handle.last_error().is_some());

        handle.shutdown();
        assert!(queue.is_closed());
    }

    #[test]
    fn test_source_task_shutdown_without_data() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let queue = Arc::new(DeliveryQueue::new(QueueConfig::unbounded()));
        let reader = Box::new(InMemoryQueueReader::new("q", Arc::clone(&queue)));
        let mut handle =
            spawn_source_task(runtime.handle(), "r".into(), reader, stream(), &config()).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        handle.shutdown();
        assert!(queue.is_closed());
        assert_eq!(handle.metrics().records, 0);
    }
}
