//! The pipeline facade.
//!
//! A [`Pipeline`] owns the catalog of streams and queues, the registered
//! pumps, readers and writers, and the tokio runtime driving the adapter
//! tasks. Declarations are serialized by one registry lock; the data path
//! (push, dispatch, pop) never takes it.
//!
//! The API is synchronous. `pop` parks the calling thread; call it from a
//! plain thread or a blocking task, not from inside an async executor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info};

use sluice_connectors::config::{InMemoryQueueOptions, NetClientOptions, NetServerOptions};
use sluice_connectors::memory::InMemoryQueueReader;
use sluice_connectors::net::{NetClientWriter, NetServerReader};
use sluice_connectors::{AdapterKind, ConnectorError, SinkWriter, SourceReader, SourceRow};
use sluice_core::cursor::SinkRow;
use sluice_core::diagnostics::LastError;
use sluice_core::plan::PumpPlan;
use sluice_core::queue::{DeliveryQueue, OverflowPolicy, QueueConfig, QueueStats};
use sluice_core::{Row, SchemaRef};

use crate::builder::PipelineBuilder;
use crate::catalog::{creates_cycle, Catalog, QueueBinding};
use crate::config::EngineConfig;
use crate::definition::{
    PumpDefinition, PumpState, ReaderDefinition, StreamDefinition, StreamKind, WriterDefinition,
};
use crate::error::DbError;
use crate::metrics::{ReaderMetrics, WriterMetrics};
use crate::pump::{Pump, PumpMetricsSnapshot};
use crate::session::Session;
use crate::sink_task::SinkTaskHandle;
use crate::source_task::{spawn_source_task, SourceTaskHandle};

struct ReaderEntry {
    definition: ReaderDefinition,
    task: SourceTaskHandle,
    queue: Option<String>,
}

enum WriterSink {
    /// In-memory queue drained by `pop`.
    Queue(String),
    /// Network writer fed through a buffer.
    Task(SinkTaskHandle),
}

struct WriterEntry {
    definition: WriterDefinition,
    sink: WriterSink,
}

impl WriterEntry {
    fn consumer_id(&self) -> String {
        format!("writer:{}", self.definition.name)
    }
}

#[derive(Default)]
struct Registry {
    pumps: AHashMap<String, Pump>,
    readers: AHashMap<String, ReaderEntry>,
    writers: AHashMap<String, WriterEntry>,
}

impl Registry {
    fn adapter_exists(&self, name: &str) -> bool {
        self.readers.contains_key(name) || self.writers.contains_key(name)
    }

    fn stream_user(&self, stream: &str) -> Option<String> {
        if let Some(p) = self
            .pumps
            .values()
            .find(|p| p.definition().source == stream || p.definition().target == stream)
        {
            return Some(format!("pump '{}'", p.name()));
        }
        if let Some(r) = self.readers.values().find(|r| r.definition.stream == stream) {
            return Some(format!("reader '{}'", r.definition.name));
        }
        self.writers
            .values()
            .find(|w| w.definition.stream == stream)
            .map(|w| format!("writer '{}'", w.definition.name))
    }

    fn pump_mut(&mut self, name: &str) -> Result<&mut Pump, DbError> {
        self.pumps
            .get_mut(name)
            .ok_or_else(|| DbError::PumpNotFound(name.to_owned()))
    }

    fn pump(&self, name: &str) -> Result<&Pump, DbError> {
        self.pumps
            .get(name)
            .ok_or_else(|| DbError::PumpNotFound(name.to_owned()))
    }
}

struct Inner {
    config: EngineConfig,
    catalog: Catalog,
    registry: Mutex<Registry>,
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
    closed: AtomicBool,
}

impl Inner {
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Waiting on tasks happens outside the registry lock.
        let registry = std::mem::take(&mut *self.registry.lock());
        for (_, mut reader) in registry.readers {
            reader.task.shutdown();
        }
        for (_, mut pump) in registry.pumps {
            pump.halt();
        }
        for (_, writer) in registry.writers {
            if let WriterSink::Task(mut task) = writer.sink {
                task.close();
            }
        }
        self.catalog.clear();
        info!("pipeline closed");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.close();
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
    }
}

/// A continuous query pipeline.
///
/// Cloning is cheap; clones share the same pipeline. The pipeline shuts
/// down when [`close`](Self::close) is called or the last clone drops.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

impl Pipeline {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Pipeline with the default configuration.
    ///
    /// # Errors
    ///
    /// The runtime could not be started.
    pub fn open() -> Result<Self, DbError> {
        Self::with_config(EngineConfig::default())
    }

    /// Pipeline with `config`.
    ///
    /// # Errors
    ///
    /// Invalid configuration, or the runtime could not be started.
    pub fn with_config(config: EngineConfig) -> Result<Self, DbError> {
        config.validate()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker.io_threads)
            .thread_name("sluice-io")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        info!(io_threads = config.worker.io_threads, "pipeline opened");
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                catalog: Catalog::new(),
                registry: Mutex::new(Registry::default()),
                handle,
                runtime: Mutex::new(Some(runtime)),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// New execution context with its own last-error slot.
    #[must_use]
    pub fn session(&self) -> Session {
        Session::new(self.clone())
    }

    fn ensure_open(&self) -> Result<(), DbError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(DbError::Shutdown);
        }
        Ok(())
    }

    // ── Streams ──

    /// Declares a stream.
    ///
    /// # Errors
    ///
    /// Duplicate name or invalid schema.
    pub fn create_stream(&self, definition: StreamDefinition) -> Result<(), DbError> {
        self.ensure_open()?;
        let _registry = self.inner.registry.lock();
        self.inner.catalog.add_stream(&definition)?;
        info!(stream = %definition.name, kind = %definition.kind, "stream created");
        Ok(())
    }

    /// Drops a stream no pump, reader or writer references.
    ///
    /// # Errors
    ///
    /// Unknown stream, or stream still in use.
    pub fn drop_stream(&self, name: &str) -> Result<(), DbError> {
        self.ensure_open()?;
        let registry = self.inner.registry.lock();
        let user = registry.stream_user(name).or_else(|| {
            self.inner
                .catalog
                .queue_bound_to(name)
                .map(|queue| format!("queue '{queue}'"))
        });
        if let Some(user) = user {
            return Err(DbError::StreamInUse {
                stream: name.to_owned(),
                user,
            });
        }
        self.inner.catalog.remove_stream(name)?;
        info!(stream = %name, "stream dropped");
        Ok(())
    }

    /// Schema of a stream.
    ///
    /// # Errors
    ///
    /// Unknown stream.
    pub fn stream_schema(&self, name: &str) -> Result<SchemaRef, DbError> {
        Ok(Arc::clone(self.inner.catalog.stream(name)?.schema()))
    }

    /// Names of all streams, sorted.
    #[must_use]
    pub fn streams(&self) -> Vec<String> {
        self.inner.catalog.stream_names()
    }

    // ── Pumps ──

    /// Declares a pump and, unless declared stopped, starts it.
    ///
    /// # Errors
    ///
    /// Unknown streams, a target that is not a sink, a cycle, an invalid
    /// window or a select list that does not fit the schemas.
    pub fn create_pump(&self, definition: PumpDefinition) -> Result<(), DbError> {
        self.ensure_open()?;
        let mut registry = self.inner.registry.lock();
        if registry.pumps.contains_key(&definition.name) {
            return Err(DbError::PumpAlreadyExists(definition.name));
        }
        let input = self.inner.catalog.stream(&definition.source)?;
        let output = self.inner.catalog.stream(&definition.target)?;
        if output.kind() != StreamKind::Sink {
            return Err(DbError::InvalidOperation(format!(
                "pump target '{}' must be a SINK stream",
                definition.target
            )));
        }
        let edges = registry
            .pumps
            .values()
            .map(|p| (p.definition().source.as_str(), p.definition().target.as_str()));
        if creates_cycle(edges, &definition.source, &definition.target) {
            return Err(DbError::InvalidOperation(format!(
                "pump '{}' from '{}' into '{}' would create a cycle",
                definition.name, definition.source, definition.target
            )));
        }

        let query = definition.query()?;
        let plan = PumpPlan::compile(input.schema(), output.schema(), &query)?;
        let initial_state = definition.initial_state;
        if initial_state == PumpState::Failed {
            return Err(DbError::InvalidOperation(
                "a pump cannot be created FAILED".into(),
            ));
        }

        let name = definition.name.clone();
        let mut pump = Pump::new(definition, plan, input, output, self.inner.config.pump.inbox());
        if initial_state == PumpState::Started {
            pump.start(&self.inner.handle)?;
        }
        info!(pump = %name, state = %pump.state(), "pump created");
        registry.pumps.insert(name, pump);
        Ok(())
    }

    /// Starts a stopped pump.
    ///
    /// # Errors
    ///
    /// Unknown or poisoned pump.
    pub fn start_pump(&self, name: &str) -> Result<(), DbError> {
        self.ensure_open()?;
        self.inner
            .registry
            .lock()
            .pump_mut(name)?
            .start(&self.inner.handle)
    }

    /// Stops a pump, discarding its open windows.
    ///
    /// # Errors
    ///
    /// Unknown or poisoned pump.
    pub fn stop_pump(&self, name: &str) -> Result<(), DbError> {
        self.ensure_open()?;
        let stopping = self.inner.registry.lock().pump_mut(name)?.stop()?;
        if let Some(stopping) = stopping {
            stopping.wait();
        }
        Ok(())
    }

    /// Stops and removes a pump, poisoned or not.
    ///
    /// # Errors
    ///
    /// Unknown pump.
    pub fn drop_pump(&self, name: &str) -> Result<(), DbError> {
        self.ensure_open()?;
        let pump = self
            .inner
            .registry
            .lock()
            .pumps
            .remove(name)
            .ok_or_else(|| DbError::PumpNotFound(name.to_owned()))?;
        drop(pump);
        info!(pump = %name, "pump dropped");
        Ok(())
    }

    /// Current lifecycle state of a pump.
    ///
    /// # Errors
    ///
    /// Unknown pump.
    pub fn pump_state(&self, name: &str) -> Result<PumpState, DbError> {
        Ok(self.inner.registry.lock().pump(name)?.state())
    }

    /// Counter snapshot of a pump.
    ///
    /// # Errors
    ///
    /// Unknown pump.
    pub fn pump_metrics(&self, name: &str) -> Result<PumpMetricsSnapshot, DbError> {
        Ok(self.inner.registry.lock().pump(name)?.metrics())
    }

    /// Last row or window failure inside a pump.
    ///
    /// # Errors
    ///
    /// Unknown pump.
    pub fn pump_last_error(&self, name: &str) -> Result<Option<LastError>, DbError> {
        Ok(self.inner.registry.lock().pump(name)?.last_error())
    }

    /// Names of all pumps, sorted.
    #[must_use]
    pub fn pumps(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.registry.lock().pumps.keys().cloned().collect();
        names.sort();
        names
    }

    // ── Readers ──

    /// Binds a reader to a source stream and opens it.
    ///
    /// # Errors
    ///
    /// Duplicate name, unknown or non-source stream, bad options, or the
    /// adapter failed to open.
    pub fn create_reader(&self, definition: ReaderDefinition) -> Result<(), DbError> {
        self.ensure_open()?;
        let mut registry = self.inner.registry.lock();
        if registry.adapter_exists(&definition.name) {
            return Err(DbError::AdapterAlreadyExists(definition.name));
        }
        let stream = self.inner.catalog.stream(&definition.stream)?;
        if stream.kind() != StreamKind::Source {
            return Err(DbError::InvalidOperation(format!(
                "reader '{}' must read into a SOURCE stream, '{}' is a {}",
                definition.name,
                definition.stream,
                stream.kind()
            )));
        }

        let (reader, queue): (Box<dyn SourceReader>, Option<String>) = match definition.kind {
            AdapterKind::InMemoryQueue => {
                let options = InMemoryQueueOptions::from_options(&definition.options)?;
                let queue = Arc::new(DeliveryQueue::new(self.queue_config(options.capacity)));
                self.inner.catalog.add_queue(
                    &options.name,
                    QueueBinding::Source {
                        stream: definition.stream.clone(),
                        queue: Arc::clone(&queue),
                    },
                )?;
                let reader: Box<dyn SourceReader> =
                    Box::new(InMemoryQueueReader::new(options.name.clone(), queue));
                (reader, Some(options.name))
            }
            AdapterKind::NetServer => {
                let options = NetServerOptions::from_options(&definition.options)?;
                let reader: Box<dyn SourceReader> = Box::new(NetServerReader::new(options));
                (reader, None)
            }
            AdapterKind::NetClient => {
                return Err(ConnectorError::ConfigurationError(
                    "NET_CLIENT can only be used as a writer".into(),
                )
                .into());
            }
        };

        let task = match spawn_source_task(
            &self.inner.handle,
            definition.name.clone(),
            reader,
            stream,
            &self.inner.config.source_reader,
        ) {
            Ok(task) => task,
            Err(e) => {
                if let Some(queue) = &queue {
                    self.inner.catalog.remove_queue(queue);
                }
                return Err(e);
            }
        };

        info!(reader = %definition.name, stream = %definition.stream, kind = %definition.kind, "reader created");
        registry.readers.insert(
            definition.name.clone(),
            ReaderEntry {
                definition,
                task,
                queue,
            },
        );
        Ok(())
    }

    /// Stops and removes a reader, closing its queue.
    ///
    /// # Errors
    ///
    /// Unknown reader.
    pub fn drop_reader(&self, name: &str) -> Result<(), DbError> {
        self.ensure_open()?;
        let mut entry = self
            .inner
            .registry
            .lock()
            .readers
            .remove(name)
            .ok_or_else(|| DbError::ReaderNotFound(name.to_owned()))?;
        if let Some(queue) = &entry.queue {
            if let Some(binding) = self.inner.catalog.remove_queue(queue) {
                binding.close();
            }
        }
        entry.task.shutdown();
        info!(reader = %name, "reader dropped");
        Ok(())
    }

    /// Counter snapshot of a reader task.
    ///
    /// # Errors
    ///
    /// Unknown reader.
    pub fn reader_metrics(&self, name: &str) -> Result<ReaderMetrics, DbError> {
        self.inner
            .registry
            .lock()
            .readers
            .get(name)
            .map(|r| r.task.metrics())
            .ok_or_else(|| DbError::ReaderNotFound(name.to_owned()))
    }

    /// Last rejected row or poll failure of a reader.
    ///
    /// # Errors
    ///
    /// Unknown reader.
    pub fn reader_last_error(&self, name: &str) -> Result<Option<LastError>, DbError> {
        self.inner
            .registry
            .lock()
            .readers
            .get(name)
            .map(|r| r.task.last_error())
            .ok_or_else(|| DbError::ReaderNotFound(name.to_owned()))
    }

    // ── Writers ──

    /// Binds a writer to a sink stream.
    ///
    /// # Errors
    ///
    /// Duplicate name, unknown or non-sink stream, bad options, or the
    /// adapter failed to open.
    pub fn create_writer(&self, definition: WriterDefinition) -> Result<(), DbError> {
        self.ensure_open()?;
        let mut registry = self.inner.registry.lock();
        if registry.adapter_exists(&definition.name) {
            return Err(DbError::AdapterAlreadyExists(definition.name));
        }
        let stream = self.inner.catalog.stream(&definition.stream)?;
        if stream.kind() != StreamKind::Sink {
            return Err(DbError::InvalidOperation(format!(
                "writer '{}' must drain a SINK stream, '{}' is a {}",
                definition.name,
                definition.stream,
                stream.kind()
            )));
        }

        let (queue, sink) = match definition.kind {
            AdapterKind::InMemoryQueue => {
                let options = InMemoryQueueOptions::from_options(&definition.options)?;
                let queue = Arc::new(DeliveryQueue::new(self.queue_config(options.capacity)));
                self.inner.catalog.add_queue(
                    &options.name,
                    QueueBinding::Sink {
                        stream: definition.stream.clone(),
                        queue: Arc::clone(&queue),
                    },
                )?;
                (queue, WriterSink::Queue(options.name))
            }
            AdapterKind::NetClient => {
                let options = NetClientOptions::from_options(&definition.options)?;
                let sink_config = &self.inner.config.sink_writer;
                let writer: Box<dyn SinkWriter> = Box::new(NetClientWriter::new(
                    Arc::clone(stream.schema()),
                    options,
                    sink_config.timeouts(),
                ));
                let buffer = Arc::new(DeliveryQueue::new(QueueConfig::bounded(
                    sink_config.buffer_capacity,
                    OverflowPolicy::Block,
                )));
                let task = SinkTaskHandle::spawn(
                    &self.inner.handle,
                    definition.name.clone(),
                    writer,
                    Arc::clone(&buffer),
                    sink_config.flush_interval(),
                )?;
                (buffer, WriterSink::Task(task))
            }
            AdapterKind::NetServer => {
                return Err(ConnectorError::ConfigurationError(
                    "NET_SERVER can only be used as a reader".into(),
                )
                .into());
            }
        };

        let entry = WriterEntry { definition, sink };
        stream.attach(&entry.consumer_id(), queue);
        info!(
            writer = %entry.definition.name,
            stream = %entry.definition.stream,
            kind = %entry.definition.kind,
            "writer created"
        );
        registry.writers.insert(entry.definition.name.clone(), entry);
        Ok(())
    }

    /// Detaches and removes a writer. Consumers blocked on its queue wake
    /// with a closed-queue error.
    ///
    /// # Errors
    ///
    /// Unknown writer.
    pub fn drop_writer(&self, name: &str) -> Result<(), DbError> {
        self.ensure_open()?;
        let entry = self
            .inner
            .registry
            .lock()
            .writers
            .remove(name)
            .ok_or_else(|| DbError::WriterNotFound(name.to_owned()))?;
        if let Ok(stream) = self.inner.catalog.stream(&entry.definition.stream) {
            stream.detach(&entry.consumer_id());
        }
        match entry.sink {
            WriterSink::Queue(queue) => {
                if let Some(binding) = self.inner.catalog.remove_queue(&queue) {
                    binding.close();
                }
            }
            WriterSink::Task(mut task) => task.close(),
        }
        info!(writer = %name, "writer dropped");
        Ok(())
    }

    /// Counter snapshot of a network writer task.
    ///
    /// # Errors
    ///
    /// Unknown writer, or an in-memory writer (use [`queue_stats`](Self::queue_stats)).
    pub fn writer_metrics(&self, name: &str) -> Result<WriterMetrics, DbError> {
        match self.inner.registry.lock().writers.get(name) {
            Some(WriterEntry {
                sink: WriterSink::Task(task),
                ..
            }) => Ok(task.metrics()),
            Some(_) => Err(DbError::InvalidOperation(format!(
                "writer '{name}' is an in-memory queue"
            ))),
            None => Err(DbError::WriterNotFound(name.to_owned())),
        }
    }

    /// Last write failure of a network writer.
    ///
    /// # Errors
    ///
    /// Unknown writer.
    pub fn writer_last_error(&self, name: &str) -> Result<Option<LastError>, DbError> {
        match self.inner.registry.lock().writers.get(name) {
            Some(WriterEntry {
                sink: WriterSink::Task(task),
                ..
            }) => Ok(task.last_error()),
            Some(_) => Ok(None),
            None => Err(DbError::WriterNotFound(name.to_owned())),
        }
    }

    fn queue_config(&self, capacity: Option<usize>) -> QueueConfig {
        let defaults = self.inner.config.queue;
        QueueConfig {
            capacity: capacity.or(defaults.capacity),
            overflow: defaults.overflow,
        }
    }

    // ── Delivery ──

    /// Appends a row to an `IN_MEMORY_QUEUE` reader's queue.
    ///
    /// # Errors
    ///
    /// Unknown queue, full `Reject` queue, or closed queue.
    pub fn push(&self, queue: &str, row: SourceRow) -> Result<(), DbError> {
        self.ensure_open()?;
        self.inner
            .catalog
            .source_queue(queue)?
            .push(row)
            .map_err(|e| DbError::queue(queue, e))
    }

    /// Removes the next row of a sink queue, waiting until one arrives.
    ///
    /// # Errors
    ///
    /// Unknown queue, or the queue was closed while waiting.
    pub fn pop(&self, queue: &str) -> Result<SinkRow, DbError> {
        self.ensure_open()?;
        let q = self.inner.catalog.sink_queue(queue)?;
        let row = q.pop_blocking().map_err(|e| DbError::queue(queue, e))?;
        debug!(queue = %queue, "row popped");
        Ok(SinkRow::new(row))
    }

    /// Removes the next row of a sink queue if one is buffered.
    ///
    /// `Ok(None)` means the queue exists and is empty.
    ///
    /// # Errors
    ///
    /// Unknown or closed queue.
    pub fn pop_non_blocking(&self, queue: &str) -> Result<Option<SinkRow>, DbError> {
        self.ensure_open()?;
        let q = self.inner.catalog.sink_queue(queue)?;
        let row: Option<Row> = q.try_pop().map_err(|e| DbError::queue(queue, e))?;
        Ok(row.map(SinkRow::new))
    }

    /// Counters of a named queue.
    ///
    /// # Errors
    ///
    /// Unknown queue.
    pub fn queue_stats(&self, queue: &str) -> Result<QueueStats, DbError> {
        match self.inner.catalog.sink_queue(queue) {
            Ok(q) => Ok(q.stats()),
            Err(_) => Ok(self.inner.catalog.source_queue(queue)?.stats()),
        }
    }

    // ── Lifecycle ──

    /// Stops every reader, pump and writer and closes every queue.
    /// Idempotent; later operations fail with [`DbError::Shutdown`].
    pub fn close(&self) {
        self.inner.close();
    }

    /// Whether [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("streams", &self.streams())
            .field("pumps", &self.pumps())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
