//! Per-writer task that owns a [`SinkWriter`].
//!
//! The sink stream feeds a bounded buffer queue; the task drains it,
//! writes each row and flushes when the buffer runs dry or the flush
//! interval elapses. Closing the buffer makes the task write what is left,
//! flush, close the writer and exit. A full buffer blocks the pumps
//! writing to the stream.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, warn};

use sluice_connectors::{ConnectorError, SinkWriter};
use sluice_core::diagnostics::{ErrorCell, LastError};
use sluice_core::queue::DeliveryQueue;
use sluice_core::Row;

use crate::error::DbError;
use crate::metrics::{SinkTaskMetrics, WriterMetrics};

/// How long shutdown waits for the task to drain and close its writer.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle for a running sink task.
pub(crate) struct SinkTaskHandle {
    name: String,
    buffer: Arc<DeliveryQueue<Row>>,
    metrics: Arc<SinkTaskMetrics>,
    errors: Arc<ErrorCell>,
    done: Option<mpsc::Receiver<()>>,
}

impl SinkTaskHandle {
    /// Spawns the task and returns once the writer is open.
    ///
    /// # Errors
    ///
    /// The writer failed to open.
    pub(crate) fn spawn(
        runtime: &Handle,
        name: String,
        writer: Box<dyn SinkWriter>,
        buffer: Arc<DeliveryQueue<Row>>,
        flush_interval: Duration,
    ) -> Result<Self, DbError> {
        let metrics = Arc::new(SinkTaskMetrics::default());
        let errors = Arc::new(ErrorCell::new());
        let (opened_tx, opened_rx) = mpsc::sync_channel::<Result<(), ConnectorError>>(1);
        let (done_tx, done) = mpsc::channel::<()>();

        runtime.spawn(run_sink_task(
            name.clone(),
            writer,
            Arc::clone(&buffer),
            Arc::clone(&metrics),
            Arc::clone(&errors),
            flush_interval,
            opened_tx,
            done_tx,
        ));

        match opened_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                name,
                buffer,
                metrics,
                errors,
                done: Some(done),
            }),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(DbError::Shutdown),
        }
    }

    pub(crate) fn metrics(&self) -> WriterMetrics {
        self.metrics.snapshot()
    }

    pub(crate) fn last_error(&self) -> Option<LastError> {
        self.errors.last()
    }

    /// Closes the buffer and waits for the task to drain it.
    pub(crate) fn close(&mut self) {
        let Some(done) = self.done.take() else {
            return;
        };
        self.buffer.close();
        if let Err(mpsc::RecvTimeoutError::Timeout) = done.recv_timeout(SHUTDOWN_TIMEOUT) {
            warn!(writer = %self.name, "sink task did not stop in time");
        }
    }
}

impl Drop for SinkTaskHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Main loop for a sink task.
#[allow(clippy::too_many_arguments)]
async fn run_sink_task(
    name: String,
    mut writer: Box<dyn SinkWriter>,
    buffer: Arc<DeliveryQueue<Row>>,
    metrics: Arc<SinkTaskMetrics>,
    errors: Arc<ErrorCell>,
    flush_interval: Duration,
    opened: mpsc::SyncSender<Result<(), ConnectorError>>,
    _done: mpsc::Sender<()>,
) {
    if let Err(e) = writer.open().await {
        let _ = opened.send(Err(e));
        return;
    }
    let _ = opened.send(Ok(()));
    debug!(writer = %name, "sink task started");

    let ready = buffer.ready_notify();
    let mut flush_timer = tokio::time::interval(flush_interval);
    flush_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // Skip the first immediate tick
    flush_timer.tick().await;

    let mut dirty = false;
    loop {
        let mut closed = false;
        loop {
            match buffer.try_pop() {
                Ok(Some(row)) => match writer.write_row(&row).await {
                    Ok(()) => {
                        metrics.record_write();
                        dirty = true;
                    }
                    Err(e) => {
                        metrics.record_error();
                        warn!(writer = %name, error = %e, "sink write error");
                        errors.record(&e);
                    }
                },
                Ok(None) => break,
                Err(_) => {
                    closed = true;
                    break;
                }
            }
        }
        if closed {
            break;
        }

        tokio::select! {
            () = ready.notified() => {}
            _ = flush_timer.tick() => {
                if dirty {
                    flush(&name, writer.as_mut(), &metrics, &errors).await;
                    dirty = false;
                }
            }
        }
    }

    if dirty {
        flush(&name, writer.as_mut(), &metrics, &errors).await;
    }
    if let Err(e) = writer.close().await {
        warn!(writer = %name, error = %e, "sink close failed");
        errors.record(&e);
    }
    debug!(writer = %name, rows = metrics.snapshot().records, "sink task stopped");
}

async fn flush(name: &str, writer: &mut dyn SinkWriter, metrics: &SinkTaskMetrics, errors: &ErrorCell) {
    match writer.flush().await {
        Ok(()) => metrics.record_flush(),
        Err(e) => {
            metrics.record_error();
            warn!(writer = %name, error = %e, "sink flush failed");
            errors.record(&e);
        }
    }
}
