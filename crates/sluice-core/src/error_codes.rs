//! Sluice error code registry.
//!
//! Every failure that crosses the public API carries a stable negative
//! integer code. Codes are never reused and never renumbered, so embedders
//! may match on them across versions.
//!
//! | Code | Name | Meaning |
//! |------|------|---------|
//! | `0` | `Ok` | success |
//! | `-1` | `Unknown` | unclassified failure |
//! | `-2` | `ForeignIo` | I/O error talking to an external system |
//! | `-3` | `ForeignSourceTimeout` | external source did not answer in time |
//! | `-4` | `InputTimeout` | no input available within the poll interval |
//! | `-5` | `CoreIo` | I/O error inside the engine itself |
//! | `-6` | `ThreadPoisoned` | a worker panicked and was retired |
//! | `-7` | `InvalidOption` | bad or missing adapter option |
//! | `-8` | `InvalidFormat` | malformed record or value |
//! | `-9` | `Unavailable` | named object absent, closed, or already consumed |
//! | `-10` | `Sql` | schema, type, or statement level error |
//! | `-11` | `InvalidConfig` | bad engine configuration |
//! | `-12` | `NullValue` | a NULL column was read as a value |
//! | `-126` | `Insufficient` | caller buffer too small |
//! | `-127` | `NullArgument` | required argument missing |
//!
//! Row-level faults raised on the hot path use [`RowFault`], which is `Copy`
//! and never allocates; it maps onto an [`ErrorCode`] only when surfaced.

use std::fmt;

/// Stable error classification surfaced to embedders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Success.
    Ok = 0,
    /// Unclassified failure.
    Unknown = -1,
    /// I/O error in an external system.
    ForeignIo = -2,
    /// External source timed out.
    ForeignSourceTimeout = -3,
    /// No input arrived within the poll interval.
    InputTimeout = -4,
    /// Internal I/O error.
    CoreIo = -5,
    /// A worker thread panicked.
    ThreadPoisoned = -6,
    /// Invalid or missing adapter option.
    InvalidOption = -7,
    /// Malformed record or value.
    InvalidFormat = -8,
    /// Named object absent, closed, or already consumed.
    Unavailable = -9,
    /// Schema, type, or statement level error.
    Sql = -10,
    /// Invalid engine configuration.
    InvalidConfig = -11,
    /// NULL column read as a non-null value.
    NullValue = -12,
    /// Caller-provided buffer is too small.
    Insufficient = -126,
    /// Required argument was missing.
    NullArgument = -127,
}

impl ErrorCode {
    /// All codes, in registry order.
    pub const ALL: [Self; 15] = [
        Self::Ok,
        Self::Unknown,
        Self::ForeignIo,
        Self::ForeignSourceTimeout,
        Self::InputTimeout,
        Self::CoreIo,
        Self::ThreadPoisoned,
        Self::InvalidOption,
        Self::InvalidFormat,
        Self::Unavailable,
        Self::Sql,
        Self::InvalidConfig,
        Self::NullValue,
        Self::Insufficient,
        Self::NullArgument,
    ];

    /// Numeric value of the code.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Looks up a code by its numeric value.
    #[must_use]
    pub fn from_i32(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_i32() == code)
    }

    /// Short symbolic name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Unknown => "UNKNOWN",
            Self::ForeignIo => "FOREIGN_IO",
            Self::ForeignSourceTimeout => "FOREIGN_SOURCE_TIMEOUT",
            Self::InputTimeout => "INPUT_TIMEOUT",
            Self::CoreIo => "CORE_IO",
            Self::ThreadPoisoned => "THREAD_POISONED",
            Self::InvalidOption => "INVALID_OPTION",
            Self::InvalidFormat => "INVALID_FORMAT",
            Self::Unavailable => "UNAVAILABLE",
            Self::Sql => "SQL",
            Self::InvalidConfig => "INVALID_CONFIG",
            Self::NullValue => "NULL_VALUE",
            Self::Insufficient => "INSUFFICIENT",
            Self::NullArgument => "NULL_ARGUMENT",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_i32())
    }
}

/// Implemented by every error type that crosses the public API.
pub trait HasErrorCode {
    /// Classification of this error.
    fn error_code(&self) -> ErrorCode;
}

/// Row-level fault raised while a pump processes a single row.
///
/// Faults reject (or drop) one row; they never stop the pump.
/// No allocation on construction; formatted only when displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RowFault {
    /// Row belongs to a window that was already finalized.
    LateRow = 0x0001,
    /// NULL value in a NOT NULL column.
    NullInNonNullable = 0x0002,
    /// Record could not be decoded or does not fit the schema.
    MalformedRecord = 0x0003,
    /// Value has the wrong type for the column or operator.
    TypeMismatch = 0x0004,
    /// Integer overflow or non-finite float result.
    ArithmeticOverflow = 0x0005,
    /// Division by zero.
    DivisionByZero = 0x0006,
    /// Bounded queue rejected the row.
    QueueFull = 0x0007,
}

impl RowFault {
    /// Returns a static error message. No allocation.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::LateRow => "Row arrived after its window was finalized; dropped",
            Self::NullInNonNullable => "NULL value in NOT NULL column",
            Self::MalformedRecord => "Record is malformed or does not match the stream schema",
            Self::TypeMismatch => "Value type does not match the expected column type",
            Self::ArithmeticOverflow => "Arithmetic overflow",
            Self::DivisionByZero => "Division by zero",
            Self::QueueFull => "Queue is full; row rejected",
        }
    }

    /// Numeric code for metrics counters.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Public classification of this fault.
    #[must_use]
    pub const fn error_code(self) -> ErrorCode {
        match self {
            Self::LateRow | Self::QueueFull => ErrorCode::Unavailable,
            Self::NullInNonNullable | Self::MalformedRecord => ErrorCode::InvalidFormat,
            Self::TypeMismatch | Self::ArithmeticOverflow | Self::DivisionByZero => {
                ErrorCode::Sql
            }
        }
    }
}

impl fmt::Display for RowFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.error_code().name(), self.message())
    }
}

impl std::error::Error for RowFault {}

impl HasErrorCode for RowFault {
    fn error_code(&self) -> ErrorCode {
        RowFault::error_code(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorCode::Ok.as_i32(), 0);
        assert_eq!(ErrorCode::Unknown.as_i32(), -1);
        assert_eq!(ErrorCode::InvalidOption.as_i32(), -7);
        assert_eq!(ErrorCode::Unavailable.as_i32(), -9);
        assert_eq!(ErrorCode::Sql.as_i32(), -10);
        assert_eq!(ErrorCode::NullValue.as_i32(), -12);
        assert_eq!(ErrorCode::Insufficient.as_i32(), -126);
        assert_eq!(ErrorCode::NullArgument.as_i32(), -127);
    }

    #[test]
    fn codes_are_unique_and_reversible() {
        for code in ErrorCode::ALL {
            assert_eq!(ErrorCode::from_i32(code.as_i32()), Some(code));
        }
        assert_eq!(ErrorCode::from_i32(-50), None);
    }

    #[test]
    fn row_fault_is_copy_and_small() {
        let f = RowFault::LateRow;
        let g = f;
        assert_eq!(f, g);
        assert_eq!(std::mem::size_of::<RowFault>(), 2);
    }

    #[test]
    fn row_fault_display() {
        let s = RowFault::LateRow.to_string();
        assert!(s.starts_with("[UNAVAILABLE]"));
        assert!(s.contains("finalized"));
        assert_eq!(
            RowFault::ArithmeticOverflow.error_code(),
            ErrorCode::Sql
        );
    }
}
