//! # Sluice DB
//!
//! The embeddable pipeline: declare streams, connect them with pumps, feed
//! them through readers and drain them through writers.
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use sluice_core::{expr::Expr, ColumnDef, SqlType};
//! use sluice_db::{Pipeline, PumpDefinition, ReaderDefinition, StreamDefinition, WriterDefinition};
//!
//! let pipeline = Pipeline::builder().build()?;
//! pipeline.create_stream(StreamDefinition::source("trades", vec![
//!     ColumnDef::new("ts", SqlType::Timestamp).rowtime(),
//!     ColumnDef::new("price", SqlType::Float),
//! ]))?;
//! pipeline.create_stream(StreamDefinition::sink("avg_price", vec![
//!     ColumnDef::new("ts", SqlType::Timestamp),
//!     ColumnDef::new("avg", SqlType::Float),
//! ]))?;
//! pipeline.create_pump(
//!     PumpDefinition::new("avg10s", "trades", "avg_price")
//!         .column("ts", Expr::col("ts").floor_time(Duration::from_secs(10)))
//!         .column("avg", Expr::col("price").avg())
//!         .fixed_window(Duration::from_secs(10), Duration::ZERO),
//! )?;
//! pipeline.create_reader(ReaderDefinition::in_memory("in", "trades", "trades_q"))?;
//! pipeline.create_writer(WriterDefinition::in_memory("out", "avg_price", "avg_q"))?;
//! ```
//!
//! Failures carry a stable [`ErrorCode`](sluice_core::ErrorCode); a
//! [`Session`] also keeps the last one for later inspection.

#![warn(missing_docs)]

mod builder;
mod catalog;
/// Engine configuration.
pub mod config;
/// Stream, pump, reader and writer declarations.
pub mod definition;
mod error;
/// Reader and writer task counters.
pub mod metrics;
mod pipeline;
mod pump;
mod session;
mod sink_task;
mod source_task;

pub use builder::PipelineBuilder;
pub use config::EngineConfig;
pub use definition::{
    PumpDefinition, PumpState, ReaderDefinition, StreamDefinition, StreamKind, WindowClause,
    WriterDefinition,
};
pub use error::DbError;
pub use metrics::{ReaderMetrics, WriterMetrics};
pub use pipeline::Pipeline;
pub use pump::PumpMetricsSnapshot;
pub use session::Session;
