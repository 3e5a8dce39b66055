//! Pump scheduler.
//!
//! Each started pump owns one worker on the runtime's blocking pool and an
//! inbox queue attached to its source stream, so every pump reading a
//! stream sees every row. Stopping detaches and closes the inbox, raises
//! the stop flag and waits for the worker, which drops the pump's window
//! state on exit. A restart begins with empty windows.

mod metrics;
mod worker;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use sluice_core::diagnostics::{ErrorCell, LastError};
use sluice_core::plan::{Operator, PumpPlan};
use sluice_core::queue::{DeliveryQueue, QueueConfig};
use sluice_core::{ErrorCode, Row};

pub use metrics::PumpMetricsSnapshot;

use self::metrics::PumpMetrics;
use self::worker::Worker;
use crate::catalog::StreamEntry;
use crate::definition::{PumpDefinition, PumpState};
use crate::error::DbError;

/// How long `stop` waits for a worker to exit.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// State shared between a pump handle and its worker.
#[derive(Debug, Default)]
pub(crate) struct PumpShared {
    state: Mutex<PumpState>,
    metrics: PumpMetrics,
    errors: ErrorCell,
}

struct Running {
    inbox: Arc<DeliveryQueue<Row>>,
    stop: Arc<AtomicBool>,
    done: mpsc::Receiver<()>,
}

/// A registered pump.
pub(crate) struct Pump {
    definition: PumpDefinition,
    plan: PumpPlan,
    input: Arc<StreamEntry>,
    output: Arc<StreamEntry>,
    inbox_config: QueueConfig,
    consumer_id: String,
    shared: Arc<PumpShared>,
    running: Option<Running>,
}

impl Pump {
    /// Registers a stopped pump.
    pub(crate) fn new(
        definition: PumpDefinition,
        plan: PumpPlan,
        input: Arc<StreamEntry>,
        output: Arc<StreamEntry>,
        inbox_config: QueueConfig,
    ) -> Self {
        let consumer_id = format!("pump:{}", definition.name);
        let shared = Arc::new(PumpShared {
            state: Mutex::new(PumpState::Stopped),
            ..PumpShared::default()
        });
        Self {
            definition,
            plan,
            input,
            output,
            inbox_config,
            consumer_id,
            shared,
            running: None,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.definition.name
    }

    pub(crate) fn definition(&self) -> &PumpDefinition {
        &self.definition
    }

    pub(crate) fn state(&self) -> PumpState {
        *self.shared.state.lock()
    }

    pub(crate) fn metrics(&self) -> PumpMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub(crate) fn last_error(&self) -> Option<LastError> {
        self.shared.errors.last()
    }

    fn ensure_healthy(&self) -> Result<(), DbError> {
        if self.state() == PumpState::Failed {
            return Err(DbError::PumpPoisoned(self.definition.name.clone()));
        }
        Ok(())
    }

    /// Starts the worker. Starting a started pump is a no-op.
    pub(crate) fn start(&mut self, runtime: &Handle) -> Result<(), DbError> {
        self.ensure_healthy()?;
        if self.running.is_some() {
            return Ok(());
        }

        let inbox = Arc::new(DeliveryQueue::new(self.inbox_config));
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done) = mpsc::channel();
        let worker = Worker {
            name: Arc::from(self.definition.name.as_str()),
            inbox: Arc::clone(&inbox),
            output: Arc::clone(&self.output),
            operator: Operator::new(&self.plan),
            shared: Arc::clone(&self.shared),
            stop: Arc::clone(&stop),
        };

        // Attach before the worker runs so no row published after `start`
        // returns is missed.
        self.input.attach(&self.consumer_id, Arc::clone(&inbox));
        *self.shared.state.lock() = PumpState::Started;

        let name = self.definition.name.clone();
        let shared = Arc::clone(&self.shared);
        let input = Arc::clone(&self.input);
        let consumer_id = self.consumer_id.clone();
        let worker_inbox = Arc::clone(&inbox);
        runtime.spawn_blocking(move || {
            let _done: mpsc::Sender<()> = done_tx;
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| worker.run())) {
                let message = panic_message(panic.as_ref());
                error!(pump = %name, panic = %message, "pump worker panicked");
                input.detach(&consumer_id);
                worker_inbox.close();
                *shared.state.lock() = PumpState::Failed;
                shared.errors.record_message(
                    ErrorCode::ThreadPoisoned,
                    format!("pump '{name}' worker panicked: {message}"),
                );
            }
        });

        info!(
            pump = %self.definition.name,
            source = %self.input.name(),
            target = %self.output.name(),
            "pump started"
        );
        self.running = Some(Running { inbox, stop, done });
        Ok(())
    }

    /// Signals the worker to stop and marks the pump stopped. The worker
    /// drops its window state on exit; wait for it through the returned
    /// [`Stopping`] once no lock is held.
    pub(crate) fn stop(&mut self) -> Result<Option<Stopping>, DbError> {
        self.ensure_healthy()?;
        let stopping = self.signal_stop();
        *self.shared.state.lock() = PumpState::Stopped;
        info!(pump = %self.definition.name, "pump stopped");
        Ok(stopping)
    }

    /// Stops the worker whatever the pump's state.
    pub(crate) fn halt(&mut self) {
        if let Some(stopping) = self.signal_stop() {
            stopping.wait();
        }
    }

    fn signal_stop(&mut self) -> Option<Stopping> {
        let running = self.running.take()?;
        running.stop.store(true, Ordering::Release);
        self.input.detach(&self.consumer_id);
        running.inbox.close();
        Some(Stopping {
            pump: self.definition.name.clone(),
            done: running.done,
        })
    }
}

/// A worker told to stop but possibly still draining.
#[must_use]
pub(crate) struct Stopping {
    pump: String,
    done: mpsc::Receiver<()>,
}

impl Stopping {
    /// Blocks until the worker exits, or [`STOP_TIMEOUT`] passes.
    pub(crate) fn wait(self) {
        if let Err(RecvTimeoutError::Timeout) = self.done.recv_timeout(STOP_TIMEOUT) {
            warn!(pump = %self.pump, "pump worker did not exit in time");
        }
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        self.halt();
    }
}

impl std::fmt::Debug for Pump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pump")
            .field("name", &self.definition.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::definition::StreamDefinition;
    use sluice_core::expr::Expr;
    use sluice_core::{ColumnDef, SqlType, Value};
    use std::time::Instant;

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    // Field order matters: the pump must stop before the runtime drops.
    struct Fixture {
        pump: Pump,
        input: Arc<StreamEntry>,
        output: Arc<StreamEntry>,
        sink: Arc<DeliveryQueue<Row>>,
        handle: Handle,
        _runtime: tokio::runtime::Runtime,
    }

    fn fixture() -> Fixture {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        let handle = runtime.handle().clone();
        let catalog = Catalog::new();
        let input = catalog
            .add_stream(&StreamDefinition::source(
                "in",
                vec![ColumnDef::new("n", SqlType::Integer)],
            ))
            .unwrap();
        let output = catalog
            .add_stream(&StreamDefinition::sink(
                "out",
                vec![ColumnDef::new("doubled", SqlType::BigInt)],
            ))
            .unwrap();
        let sink = Arc::new(DeliveryQueue::new(QueueConfig::unbounded()));
        output.attach("queue:out", Arc::clone(&sink));

        let definition = PumpDefinition::new("double", "in", "out")
            .column("doubled", Expr::col("n").mul(Expr::lit(2_i32)));
        let plan = PumpPlan::compile(input.schema(), output.schema(), &definition.query().unwrap())
            .unwrap();
        let pump = Pump::new(
            definition,
            plan,
            Arc::clone(&input),
            Arc::clone(&output),
            QueueConfig::unbounded(),
        );
        Fixture {
            pump,
            input,
            output,
            sink,
            handle,
            _runtime: runtime,
        }
    }

    fn publish(input: &StreamEntry, n: i32) {
        let row = Row::try_new(input.schema(), vec![Value::Integer(n)]).unwrap();
        input.dispatch(&row, &AtomicBool::new(false));
    }

    #[test]
    fn started_pump_projects_rows() {
        let mut f = fixture();
        f.pump.start(&f.handle).unwrap();
        assert_eq!(f.pump.state(), PumpState::Started);
        assert_eq!(f.input.consumer_count(), 1);

        publish(&f.input, 3);
        publish(&f.input, 4);
        assert_eq!(f.sink.pop_blocking().unwrap().values(), &[Value::BigInt(6)]);
        assert_eq!(f.sink.pop_blocking().unwrap().values(), &[Value::BigInt(8)]);
        assert!(wait_until(|| f.pump.metrics().rows_out == 2));
        assert_eq!(f.pump.metrics().rows_in, 2);
    }

    #[test]
    fn stopped_pump_ignores_input() {
        let mut f = fixture();
        f.pump.start(&f.handle).unwrap();
        f.pump.stop().unwrap().unwrap().wait();
        assert_eq!(f.pump.state(), PumpState::Stopped);
        assert!(f.pump.stop().unwrap().is_none());
        assert_eq!(f.input.consumer_count(), 0);

        publish(&f.input, 1);
        std::thread::sleep(Duration::from_millis(20));
        assert!(f.sink.is_empty());

        f.pump.start(&f.handle).unwrap();
        publish(&f.input, 5);
        assert_eq!(f.sink.pop_blocking().unwrap().values(), &[Value::BigInt(10)]);
        assert_eq!(f.output.name(), "out");
    }

    #[test]
    fn start_is_idempotent() {
        let mut f = fixture();
        f.pump.start(&f.handle).unwrap();
        f.pump.start(&f.handle).unwrap();
        assert_eq!(f.input.consumer_count(), 1);
    }

    #[test]
    fn poisoned_pump_refuses_operations() {
        let mut f = fixture();
        *f.pump.shared.state.lock() = PumpState::Failed;
        assert!(matches!(f.pump.start(&f.handle), Err(DbError::PumpPoisoned(_))));
        assert!(matches!(f.pump.stop(), Err(DbError::PumpPoisoned(_))));
    }

    #[test]
    fn panic_message_extracts_text() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
