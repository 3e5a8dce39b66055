//! Error types for the sluice pipeline facade.

use sluice_connectors::ConnectorError;
use sluice_core::cursor::ColumnError;
use sluice_core::queue::QueueError;
use sluice_core::{ErrorCode, HasErrorCode};

/// Errors from pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Row, schema or query error from the engine.
    #[error(transparent)]
    Core(#[from] sluice_core::Error),

    /// Adapter error.
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    /// Column access on a popped row failed.
    #[error(transparent)]
    Column(#[from] ColumnError),

    /// Stream not found.
    #[error("stream '{0}' not found")]
    StreamNotFound(String),

    /// Stream already exists.
    #[error("stream '{0}' already exists")]
    StreamAlreadyExists(String),

    /// Stream is still referenced.
    #[error("stream '{stream}' is used by {user}")]
    StreamInUse {
        /// Stream name.
        stream: String,
        /// Pump, reader or writer referencing it.
        user: String,
    },

    /// Pump not found.
    #[error("pump '{0}' not found")]
    PumpNotFound(String),

    /// Pump already exists.
    #[error("pump '{0}' already exists")]
    PumpAlreadyExists(String),

    /// Pump worker panicked; the pump can only be dropped.
    #[error("pump '{0}' is poisoned")]
    PumpPoisoned(String),

    /// Reader not found.
    #[error("reader '{0}' not found")]
    ReaderNotFound(String),

    /// Writer not found.
    #[error("writer '{0}' not found")]
    WriterNotFound(String),

    /// Reader or writer already exists.
    #[error("adapter '{0}' already exists")]
    AdapterAlreadyExists(String),

    /// No queue with this name.
    #[error("queue '{0}' not found")]
    QueueNotFound(String),

    /// Queue name already bound.
    #[error("queue '{0}' already exists")]
    QueueAlreadyExists(String),

    /// Queue operation failed.
    #[error("queue '{queue}' unavailable")]
    Queue {
        /// Queue name.
        queue: String,
        /// Cause.
        #[source]
        source: QueueError,
    },

    /// Declaration is not valid for the pipeline topology.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Configuration error.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Runtime could not be started.
    #[error("failed to start runtime")]
    Io(#[from] std::io::Error),

    /// Pipeline is closed.
    #[error("pipeline is closed")]
    Shutdown,
}

impl DbError {
    pub(crate) fn queue(queue: &str, source: QueueError) -> Self {
        Self::Queue {
            queue: queue.to_owned(),
            source,
        }
    }
}

impl HasErrorCode for DbError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::Core(e) => e.error_code(),
            Self::Connector(e) => e.error_code(),
            Self::Column(e) => e.error_code(),
            Self::Queue { source, .. } => source.error_code(),
            Self::StreamNotFound(_)
            | Self::StreamAlreadyExists(_)
            | Self::StreamInUse { .. }
            | Self::PumpNotFound(_)
            | Self::PumpAlreadyExists(_)
            | Self::InvalidOperation(_) => ErrorCode::Sql,
            Self::ReaderNotFound(_)
            | Self::WriterNotFound(_)
            | Self::AdapterAlreadyExists(_)
            | Self::QueueAlreadyExists(_) => ErrorCode::InvalidOption,
            Self::QueueNotFound(_) | Self::Shutdown => ErrorCode::Unavailable,
            Self::PumpPoisoned(_) => ErrorCode::ThreadPoisoned,
            Self::Config(_) => ErrorCode::InvalidConfig,
            Self::Io(_) => ErrorCode::CoreIo,
        }
    }
}
