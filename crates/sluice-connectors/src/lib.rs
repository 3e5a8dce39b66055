//! # Sluice Connectors
//!
//! Adapters moving rows between sluice streams and the outside world.
//!
//! Source adapters implement [`SourceReader`] and hand [`SourceRow`]s to the
//! engine, which binds them to the stream schema. Sink adapters implement
//! [`SinkWriter`] and receive finished rows.

#![warn(missing_docs)]

/// Adapter kinds and option parsing.
pub mod config;

/// Reader and writer traits.
pub mod connector;

mod error;

/// JSON encoding and decoding of column values.
pub mod json;

/// `IN_MEMORY_QUEUE` source reader.
pub mod memory;

/// Adapter counters.
pub mod metrics;

/// TCP source and sink adapters.
pub mod net;

/// Rows as produced by source adapters, before schema binding.
pub mod source_row;

pub use config::{AdapterKind, ConnectorOptions, ConnectorState};
pub use connector::{SinkWriter, SourceReader};
pub use error::ConnectorError;
pub use metrics::ConnectorMetrics;
pub use source_row::{SourceRow, SourceRowBuilder, SourceValue};
