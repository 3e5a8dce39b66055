//! # Sluice Core
//!
//! The row-at-a-time engine behind sluice pipelines.
//!
//! ## Modules
//!
//! - [`types`], [`schema`], [`row`]: column types, stream schemas, immutable rows
//! - [`time`]: event time, watermarks and `FLOOR_TIME`
//! - [`window`]: tumbling window assignment and finalization
//! - [`expr`], [`aggregate`], [`plan`]: pump expressions, accumulators and
//!   compiled projection / windowed-aggregation plans
//! - [`queue`]: blocking and async-notified delivery queues
//! - [`cursor`]: single-read column access for consumers
//! - [`diagnostics`], [`error_codes`]: last-error slots and the stable code registry

#![warn(missing_docs)]

pub mod aggregate;
pub mod cursor;
pub mod diagnostics;
mod error;
pub mod error_codes;
pub mod expr;
pub mod plan;
pub mod queue;
pub mod row;
pub mod schema;
pub mod time;
pub mod types;
pub mod window;

pub use error::{Error, Result};
pub use error_codes::{ErrorCode, HasErrorCode, RowFault};
pub use row::Row;
pub use schema::{ColumnDef, SchemaRef, StreamSchema};
pub use types::{SqlType, Value};
