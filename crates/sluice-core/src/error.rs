//! Error types for the core engine.

use crate::error_codes::{ErrorCode, HasErrorCode, RowFault};
use crate::types::SqlType;

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by schema validation, expression evaluation and windowing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Invalid stream schema.
    #[error("schema error: {0}")]
    Schema(String),

    /// Statement refers to an unknown column or mixes incompatible types.
    #[error("query error: {0}")]
    Query(String),

    /// Value could not be converted to the requested type.
    #[error("cannot cast {value} to {target}")]
    Cast {
        /// Rendered source value.
        value: String,
        /// Requested type.
        target: SqlType,
    },

    /// Row does not match its stream schema.
    #[error("invalid row: {0}")]
    InvalidRow(String),

    /// NULL in a NOT NULL column.
    #[error("column '{0}' is NOT NULL")]
    NullViolation(String),

    /// Integer overflow or non-finite float.
    #[error("arithmetic overflow: {0}")]
    Overflow(String),

    /// Division by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// Invalid window length or allowed lateness.
    #[error("invalid window: {0}")]
    InvalidWindow(String),

    /// Timestamp outside the representable event-time range.
    #[error("timestamp out of range: {0}")]
    TimestampOutOfRange(String),

    /// Row rejected on the hot path.
    #[error(transparent)]
    Fault(#[from] RowFault),
}

impl Error {
    /// Hot-path classification, when the error rejects a single row.
    #[must_use]
    pub fn row_fault(&self) -> Option<RowFault> {
        match self {
            Self::Fault(f) => Some(*f),
            Self::Overflow(_) => Some(RowFault::ArithmeticOverflow),
            Self::DivisionByZero => Some(RowFault::DivisionByZero),
            Self::NullViolation(_) => Some(RowFault::NullInNonNullable),
            Self::InvalidRow(_) | Self::TimestampOutOfRange(_) => Some(RowFault::MalformedRecord),
            Self::Cast { .. } => Some(RowFault::TypeMismatch),
            Self::Schema(_) | Self::Query(_) | Self::InvalidWindow(_) => None,
        }
    }
}

impl HasErrorCode for Error {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::Schema(_) | Self::Query(_) | Self::InvalidWindow(_) => ErrorCode::Sql,
            Self::Fault(f) => f.error_code(),
            Self::Cast { .. } | Self::Overflow(_) | Self::DivisionByZero => ErrorCode::Sql,
            Self::InvalidRow(_) | Self::NullViolation(_) | Self::TimestampOutOfRange(_) => {
                ErrorCode::InvalidFormat
            }
        }
    }
}
