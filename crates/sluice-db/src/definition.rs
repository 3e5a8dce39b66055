//! Declarations of streams, pumps, readers and writers.
//!
//! These are the parsed form of the pipeline's DDL. They carry names and
//! expressions only; the pipeline validates them against the catalog when
//! they are created.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sluice_connectors::{AdapterKind, ConnectorOptions};
use sluice_core::expr::Expr;
use sluice_core::plan::QuerySpec;
use sluice_core::window::WindowSpec;
use sluice_core::ColumnDef;

use crate::error::DbError;

/// Whether a stream is fed from outside or by pumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamKind {
    /// Fed by readers; read by pumps.
    Source,
    /// Written by pumps; drained by writers and queues.
    Sink,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Source => "SOURCE",
            Self::Sink => "SINK",
        })
    }
}

/// `CREATE STREAM`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDefinition {
    /// Stream name.
    pub name: String,
    /// Stream kind.
    pub kind: StreamKind,
    /// Ordered columns.
    pub columns: Vec<ColumnDef>,
}

impl StreamDefinition {
    /// Source stream.
    #[must_use]
    pub fn source(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            kind: StreamKind::Source,
            columns,
        }
    }

    /// Sink stream.
    #[must_use]
    pub fn sink(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            kind: StreamKind::Sink,
            columns,
        }
    }
}

/// Lifecycle state of a pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PumpState {
    /// Consuming its source stream.
    #[default]
    Started,
    /// Declared but idle; holds no window state.
    Stopped,
    /// Worker died; the pump can only be dropped.
    Failed,
}

impl fmt::Display for PumpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Started => "STARTED",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
        })
    }
}

/// `FIXED WINDOW <length>, <allowed lateness>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowClause {
    /// Window length.
    pub length: Duration,
    /// Grace period after the window end.
    pub allowed_lateness: Duration,
}

/// `CREATE PUMP`.
///
/// ```rust,ignore
/// let pump = PumpDefinition::new("avg_pump", "trades", "averages")
///     .column("ts", Expr::col("ts").floor_time(Duration::from_secs(10)))
///     .column("avg", Expr::col("amount").avg())
///     .group_by(Expr::col("ts").floor_time(Duration::from_secs(10)))
///     .fixed_window(Duration::from_secs(10), Duration::ZERO);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpDefinition {
    /// Pump name.
    pub name: String,
    /// Input stream.
    pub source: String,
    /// Output stream; must be a sink.
    pub target: String,
    /// Target columns, aligned with `select`.
    pub target_columns: Vec<String>,
    /// Select list.
    pub select: Vec<Expr>,
    /// Group-by key expressions.
    #[serde(default)]
    pub group_by: Vec<Expr>,
    /// Windowing clause.
    #[serde(default)]
    pub window: Option<WindowClause>,
    /// State after creation.
    #[serde(default)]
    pub initial_state: PumpState,
}

impl PumpDefinition {
    /// Empty pump from `source` into `target`, started on creation.
    #[must_use]
    pub fn new(name: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            target: target.into(),
            target_columns: Vec::new(),
            select: Vec::new(),
            group_by: Vec::new(),
            window: None,
            initial_state: PumpState::Started,
        }
    }

    /// Appends `expr` to the select list, stored in `target_column`.
    #[must_use]
    pub fn column(mut self, target_column: impl Into<String>, expr: Expr) -> Self {
        self.target_columns.push(target_column.into());
        self.select.push(expr);
        self
    }

    /// Appends a group-by key.
    #[must_use]
    pub fn group_by(mut self, expr: Expr) -> Self {
        self.group_by.push(expr);
        self
    }

    /// Sets the tumbling window.
    #[must_use]
    pub fn fixed_window(mut self, length: Duration, allowed_lateness: Duration) -> Self {
        self.window = Some(WindowClause {
            length,
            allowed_lateness,
        });
        self
    }

    /// Creates the pump stopped.
    #[must_use]
    pub fn stopped(mut self) -> Self {
        self.initial_state = PumpState::Stopped;
        self
    }

    /// The relational part, with the window clause validated.
    ///
    /// # Errors
    ///
    /// Invalid window length.
    pub fn query(&self) -> Result<QuerySpec, DbError> {
        let window = self
            .window
            .map(|w| WindowSpec::new(w.length, w.allowed_lateness))
            .transpose()?;
        Ok(QuerySpec {
            target_columns: self.target_columns.clone(),
            select: self.select.clone(),
            group_by: self.group_by.clone(),
            window,
        })
    }
}

/// Binding of an external reader to a source stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderDefinition {
    /// Reader name.
    pub name: String,
    /// Source stream fed by the reader.
    pub stream: String,
    /// Adapter kind.
    pub kind: AdapterKind,
    /// Adapter options.
    pub options: ConnectorOptions,
}

impl ReaderDefinition {
    /// New reader binding.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        stream: impl Into<String>,
        kind: AdapterKind,
        options: ConnectorOptions,
    ) -> Self {
        Self {
            name: name.into(),
            stream: stream.into(),
            kind,
            options,
        }
    }

    /// `IN_MEMORY_QUEUE` reader fed through `push(queue, ..)`.
    #[must_use]
    pub fn in_memory(name: impl Into<String>, stream: impl Into<String>, queue: &str) -> Self {
        Self::new(
            name,
            stream,
            AdapterKind::InMemoryQueue,
            ConnectorOptions::new().with("NAME", queue),
        )
    }
}

/// Binding of an external writer to a sink stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterDefinition {
    /// Writer name.
    pub name: String,
    /// Sink stream drained by the writer.
    pub stream: String,
    /// Adapter kind.
    pub kind: AdapterKind,
    /// Adapter options.
    pub options: ConnectorOptions,
}

impl WriterDefinition {
    /// New writer binding.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        stream: impl Into<String>,
        kind: AdapterKind,
        options: ConnectorOptions,
    ) -> Self {
        Self {
            name: name.into(),
            stream: stream.into(),
            kind,
            options,
        }
    }

    /// `IN_MEMORY_QUEUE` writer drained through `pop(queue)`.
    #[must_use]
    pub fn in_memory(name: impl Into<String>, stream: impl Into<String>, queue: &str) -> Self {
        Self::new(
            name,
            stream,
            AdapterKind::InMemoryQueue,
            ConnectorOptions::new().with("NAME", queue),
        )
    }
}
