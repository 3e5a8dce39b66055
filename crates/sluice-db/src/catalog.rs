//! Stream and queue catalog.
//!
//! A [`StreamEntry`] owns the list of queues fed by the stream: pump
//! inboxes and in-memory sink queues. Producers call
//! [`StreamEntry::dispatch`], which clones the row into every attached
//! queue. Attaching and detaching never blocks a dispatch in progress;
//! a dispatch works on a snapshot of the consumer list.

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use parking_lot::RwLock;
use tracing::warn;

use sluice_connectors::SourceRow;
use sluice_core::queue::{DeliveryQueue, QueueError};
use sluice_core::{Row, SchemaRef, StreamSchema};

use crate::definition::{StreamDefinition, StreamKind};
use crate::error::DbError;

/// Queue fed by a stream.
type Consumer = (Arc<str>, Arc<DeliveryQueue<Row>>);

/// A registered stream.
pub(crate) struct StreamEntry {
    name: String,
    kind: StreamKind,
    schema: SchemaRef,
    consumers: RwLock<Vec<Consumer>>,
}

/// Result of dispatching one row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Dispatch {
    /// Queues that accepted the row.
    pub delivered: usize,
    /// Queues that rejected it because they were full.
    pub rejected: usize,
    /// The producer was stopped while blocked on a full queue.
    pub cancelled: bool,
}

impl StreamEntry {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn kind(&self) -> StreamKind {
        self.kind
    }

    pub(crate) fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Adds a consumer queue under `id`.
    pub(crate) fn attach(&self, id: &str, queue: Arc<DeliveryQueue<Row>>) {
        self.consumers.write().push((Arc::from(id), queue));
    }

    /// Removes the consumer registered under `id`.
    pub(crate) fn detach(&self, id: &str) {
        self.consumers.write().retain(|(c, _)| &**c != id);
    }

    pub(crate) fn consumer_count(&self) -> usize {
        self.consumers.read().len()
    }

    /// Pushes `row` to every consumer in attachment order.
    ///
    /// A full `Block` queue stalls the caller until it has room or `cancel`
    /// is raised. Closed queues belong to consumers being torn down and are
    /// skipped.
    pub(crate) fn dispatch(&self, row: &Row, cancel: &AtomicBool) -> Dispatch {
        let consumers: Vec<Consumer> = self.consumers.read().clone();
        let mut result = Dispatch::default();
        for (id, queue) in &consumers {
            match queue.push_cancellable(row.clone(), cancel) {
                Ok(()) => result.delivered += 1,
                Err(QueueError::Full) => {
                    result.rejected += 1;
                    warn!(stream = %self.name, consumer = %id, "queue full, row dropped");
                }
                Err(QueueError::Closed) => {}
                Err(QueueError::Cancelled) => {
                    result.cancelled = true;
                    break;
                }
            }
        }
        result
    }
}

impl std::fmt::Debug for StreamEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEntry")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("consumers", &self.consumer_count())
            .finish_non_exhaustive()
    }
}

/// What a named in-memory queue is bound to.
#[derive(Clone)]
pub(crate) enum QueueBinding {
    /// Fed by `push`, drained by a reader into `stream`.
    Source {
        stream: String,
        queue: Arc<DeliveryQueue<SourceRow>>,
    },
    /// Fed by `stream`, drained by `pop`.
    Sink {
        stream: String,
        queue: Arc<DeliveryQueue<Row>>,
    },
}

impl QueueBinding {
    pub(crate) fn stream(&self) -> &str {
        match self {
            Self::Source { stream, .. } | Self::Sink { stream, .. } => stream,
        }
    }

    pub(crate) fn close(&self) {
        match self {
            Self::Source { queue, .. } => queue.close(),
            Self::Sink { queue, .. } => queue.close(),
        }
    }
}

/// Registered streams and named queues.
#[derive(Default)]
pub(crate) struct Catalog {
    streams: RwLock<AHashMap<String, Arc<StreamEntry>>>,
    queues: RwLock<AHashMap<String, QueueBinding>>,
}

impl Catalog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a stream after validating its schema.
    pub(crate) fn add_stream(&self, def: &StreamDefinition) -> Result<Arc<StreamEntry>, DbError> {
        let schema = Arc::new(StreamSchema::new(def.columns.clone())?);
        let mut streams = self.streams.write();
        if streams.contains_key(&def.name) {
            return Err(DbError::StreamAlreadyExists(def.name.clone()));
        }
        let entry = Arc::new(StreamEntry {
            name: def.name.clone(),
            kind: def.kind,
            schema,
            consumers: RwLock::new(Vec::new()),
        });
        streams.insert(def.name.clone(), Arc::clone(&entry));
        Ok(entry)
    }

    pub(crate) fn stream(&self, name: &str) -> Result<Arc<StreamEntry>, DbError> {
        self.streams
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::StreamNotFound(name.to_owned()))
    }

    pub(crate) fn remove_stream(&self, name: &str) -> Result<Arc<StreamEntry>, DbError> {
        self.streams
            .write()
            .remove(name)
            .ok_or_else(|| DbError::StreamNotFound(name.to_owned()))
    }

    pub(crate) fn stream_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.streams.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Binds a queue name. Names are unique across source and sink queues.
    pub(crate) fn add_queue(&self, name: &str, binding: QueueBinding) -> Result<(), DbError> {
        let mut queues = self.queues.write();
        if queues.contains_key(name) {
            return Err(DbError::QueueAlreadyExists(name.to_owned()));
        }
        queues.insert(name.to_owned(), binding);
        Ok(())
    }

    pub(crate) fn remove_queue(&self, name: &str) -> Option<QueueBinding> {
        self.queues.write().remove(name)
    }

    /// Name of a queue bound to `stream`, if any.
    pub(crate) fn queue_bound_to(&self, stream: &str) -> Option<String> {
        self.queues
            .read()
            .iter()
            .find(|(_, binding)| binding.stream() == stream)
            .map(|(name, _)| name.clone())
    }

    /// Queue fed by `push`.
    pub(crate) fn source_queue(&self, name: &str) -> Result<Arc<DeliveryQueue<SourceRow>>, DbError> {
        match self.queues.read().get(name) {
            Some(QueueBinding::Source { queue, .. }) => Ok(Arc::clone(queue)),
            _ => Err(DbError::QueueNotFound(name.to_owned())),
        }
    }

    /// Queue drained by `pop`.
    pub(crate) fn sink_queue(&self, name: &str) -> Result<Arc<DeliveryQueue<Row>>, DbError> {
        match self.queues.read().get(name) {
            Some(QueueBinding::Sink { queue, .. }) => Ok(Arc::clone(queue)),
            _ => Err(DbError::QueueNotFound(name.to_owned())),
        }
    }

    /// Removes every queue and every stream, closing the queues.
    pub(crate) fn clear(&self) {
        for (_, binding) in self.queues.write().drain() {
            binding.close();
        }
        self.streams.write().clear();
    }
}

/// Whether adding the edge `source -> target` to the pump graph `edges`
/// closes a cycle.
pub(crate) fn creates_cycle<'a>(
    edges: impl IntoIterator<Item = (&'a str, &'a str)>,
    source: &str,
    target: &str,
) -> bool {
    if source == target {
        return true;
    }
    let mut graph: AHashMap<&str, Vec<&str>> = AHashMap::new();
    for (from, to) in edges {
        graph.entry(from).or_default().push(to);
    }

    let mut seen = AHashSet::new();
    let mut frontier = VecDeque::from([target]);
    while let Some(node) = frontier.pop_front() {
        if node == source {
            return true;
        }
        if seen.insert(node) {
            if let Some(next) = graph.get(node) {
                frontier.extend(next.iter().copied());
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::queue::{OverflowPolicy, QueueConfig};
    use sluice_core::{ColumnDef, SqlType, Value};
    use std::sync::atomic::Ordering;

    fn stream(catalog: &Catalog) -> Arc<StreamEntry> {
        catalog
            .add_stream(&StreamDefinition::sink(
                "out",
                vec![ColumnDef::new("n", SqlType::Integer)],
            ))
            .unwrap()
    }

    fn row(entry: &StreamEntry, n: i32) -> Row {
        Row::try_new(entry.schema(), vec![Value::Integer(n)]).unwrap()
    }

    #[test]
    fn duplicate_stream_rejected() {
        let catalog = Catalog::new();
        stream(&catalog);
        let err = catalog
            .add_stream(&StreamDefinition::source("out", vec![ColumnDef::new("x", SqlType::Text)]))
            .unwrap_err();
        assert!(matches!(err, DbError::StreamAlreadyExists(_)));
        assert!(matches!(catalog.stream("nope"), Err(DbError::StreamNotFound(_))));
    }

    #[test]
    fn invalid_schema_rejected() {
        let catalog = Catalog::new();
        let err = catalog
            .add_stream(&StreamDefinition::source(
                "s",
                vec![
                    ColumnDef::new("a", SqlType::Integer),
                    ColumnDef::new("a", SqlType::Integer),
                ],
            ))
            .unwrap_err();
        assert!(matches!(err, DbError::Core(_)));
    }

    #[test]
    fn dispatch_fans_out_and_skips_closed() {
        let catalog = Catalog::new();
        let entry = stream(&catalog);
        let a = Arc::new(DeliveryQueue::new(QueueConfig::unbounded()));
        let b = Arc::new(DeliveryQueue::new(QueueConfig::unbounded()));
        let c = Arc::new(DeliveryQueue::new(QueueConfig::unbounded()));
        entry.attach("a", Arc::clone(&a));
        entry.attach("b", Arc::clone(&b));
        entry.attach("c", Arc::clone(&c));
        c.close();

        let stop = AtomicBool::new(false);
        let result = entry.dispatch(&row(&entry, 1), &stop);
        assert_eq!(result.delivered, 2);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);

        entry.detach("b");
        entry.dispatch(&row(&entry, 2), &stop);
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn dispatch_counts_rejections() {
        let catalog = Catalog::new();
        let entry = stream(&catalog);
        let q = Arc::new(DeliveryQueue::new(QueueConfig::bounded(1, OverflowPolicy::Reject)));
        entry.attach("q", Arc::clone(&q));
        let stop = AtomicBool::new(false);
        assert_eq!(entry.dispatch(&row(&entry, 1), &stop).rejected, 0);
        assert_eq!(entry.dispatch(&row(&entry, 2), &stop).rejected, 1);
    }

    #[test]
    fn dispatch_cancelled_when_blocked() {
        let catalog = Catalog::new();
        let entry = stream(&catalog);
        let q = Arc::new(DeliveryQueue::new(QueueConfig::bounded(1, OverflowPolicy::Block)));
        entry.attach("q", q);
        let stop = AtomicBool::new(false);
        entry.dispatch(&row(&entry, 1), &stop);
        stop.store(true, Ordering::Release);
        assert!(entry.dispatch(&row(&entry, 2), &stop).cancelled);
    }

    #[test]
    fn queue_names_are_unique() {
        let catalog = Catalog::new();
        let q = Arc::new(DeliveryQueue::new(QueueConfig::unbounded()));
        catalog
            .add_queue("q", QueueBinding::Sink { stream: "out".into(), queue: q })
            .unwrap();
        let src = Arc::new(DeliveryQueue::new(QueueConfig::unbounded()));
        assert!(matches!(
            catalog.add_queue("q", QueueBinding::Source { stream: "in".into(), queue: src }),
            Err(DbError::QueueAlreadyExists(_))
        ));
        assert!(catalog.sink_queue("q").is_ok());
        assert!(matches!(catalog.source_queue("q"), Err(DbError::QueueNotFound(_))));
    }

    #[test]
    fn queue_binding_tracks_its_stream() {
        let catalog = Catalog::new();
        let q = Arc::new(DeliveryQueue::new(QueueConfig::unbounded()));
        catalog
            .add_queue("out_q", QueueBinding::Sink { stream: "out".into(), queue: q })
            .unwrap();
        assert_eq!(catalog.queue_bound_to("out").as_deref(), Some("out_q"));
        assert!(catalog.queue_bound_to("in").is_none());

        catalog.remove_queue("out_q");
        assert!(catalog.queue_bound_to("out").is_none());
    }

    #[test]
    fn cycle_detection() {
        let edges = [("a", "b"), ("b", "c")];
        assert!(creates_cycle(edges, "c", "a"));
        assert!(creates_cycle(edges, "a", "a"));
        assert!(!creates_cycle(edges, "a", "c"));
        assert!(!creates_cycle(edges, "d", "a"));
    }
}
