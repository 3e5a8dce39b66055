//! Consumer-side access to a popped row.
//!
//! Each column of a [`SinkRow`] can be fetched once. The typed getter
//! checks, in order: index in range, not already read, not NULL, type
//! convertible. A NULL column counts as read.

use chrono::NaiveDateTime;

use crate::error_codes::{ErrorCode, HasErrorCode};
use crate::row::Row;
use crate::types::{SqlType, Value, TIMESTAMP_FORMAT};

/// Column access failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ColumnError {
    /// Index past the last column.
    #[error("column {index} out of range ({len} columns)")]
    OutOfRange {
        /// Requested index.
        index: usize,
        /// Number of columns.
        len: usize,
    },
    /// Column was fetched before.
    #[error("column {0} was already read")]
    AlreadyRead(usize),
    /// Column holds NULL.
    #[error("column {0} is NULL")]
    Null(usize),
    /// Column type cannot be read as the requested Rust type.
    #[error("column {index} is {actual}, cannot read as {requested}")]
    TypeMismatch {
        /// Column index.
        index: usize,
        /// Column type.
        actual: SqlType,
        /// Requested Rust type.
        requested: &'static str,
    },
    /// Caller buffer too small.
    #[error("buffer too small: {required} bytes required")]
    Insufficient {
        /// Bytes needed.
        required: usize,
    },
}

impl HasErrorCode for ColumnError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::OutOfRange { .. } | Self::AlreadyRead(_) => ErrorCode::Unavailable,
            Self::Null(_) => ErrorCode::NullValue,
            Self::TypeMismatch { .. } => ErrorCode::Sql,
            Self::Insufficient { .. } => ErrorCode::Insufficient,
        }
    }
}

/// Rust types a column value can be read as.
///
/// Integers widen losslessly (`SMALLINT` reads as `i64`), timestamps read
/// as text, and text or blobs read as bytes.
pub trait FromValue: Sized {
    /// Name used in error messages.
    const NAME: &'static str;

    /// Converts a non-null value, `None` on type mismatch.
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for i16 {
    const NAME: &'static str = "i16";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::SmallInt(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for i32 {
    const NAME: &'static str = "i32";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::SmallInt(v) => Some(i32::from(*v)),
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for i64 {
    const NAME: &'static str = "i64";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl FromValue for u32 {
    const NAME: &'static str = "u32";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::UnsignedInteger(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for f32 {
    const NAME: &'static str = "f32";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for bool {
    const NAME: &'static str = "bool";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for String {
    const NAME: &'static str = "String";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(v) => Some(v.clone()),
            Value::Timestamp(ts) => Some(ts.format(TIMESTAMP_FORMAT).to_string()),
            _ => None,
        }
    }
}

impl FromValue for Vec<u8> {
    const NAME: &'static str = "Vec<u8>";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Blob(v) => Some(v.clone()),
            Value::Text(v) => Some(v.as_bytes().to_vec()),
            _ => None,
        }
    }
}

impl FromValue for NaiveDateTime {
    const NAME: &'static str = "NaiveDateTime";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_timestamp()
    }
}

/// A row handed to an external consumer, with per-column read tracking.
#[derive(Debug, Clone)]
pub struct SinkRow {
    row: Row,
    read: Vec<bool>,
}

impl SinkRow {
    /// Wraps a row with every column unread.
    #[must_use]
    pub fn new(row: Row) -> Self {
        let read = vec![false; row.len()];
        Self { row, read }
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read.len()
    }

    /// True for a zero-column row.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read.is_empty()
    }

    fn check(&self, index: usize) -> Result<&Value, ColumnError> {
        let value = self.row.get(index).ok_or(ColumnError::OutOfRange {
            index,
            len: self.row.len(),
        })?;
        if self.read[index] {
            return Err(ColumnError::AlreadyRead(index));
        }
        Ok(value)
    }

    /// Reads column `index` as `T`, consuming it.
    ///
    /// # Errors
    ///
    /// See [`ColumnError`]. Reading a NULL column consumes it and fails
    /// with [`ColumnError::Null`]; a type mismatch leaves it unread.
    pub fn get<T: FromValue>(&mut self, index: usize) -> Result<T, ColumnError> {
        let value = self.check(index)?;
        if value.is_null() {
            self.read[index] = true;
            return Err(ColumnError::Null(index));
        }
        let out = T::from_value(value).ok_or_else(|| ColumnError::TypeMismatch {
            index,
            actual: value.sql_type().unwrap_or(SqlType::Blob),
            requested: T::NAME,
        })?;
        self.read[index] = true;
        Ok(out)
    }

    /// Whether column `index` is NULL, without consuming it.
    ///
    /// # Errors
    ///
    /// [`ColumnError::OutOfRange`] or [`ColumnError::AlreadyRead`].
    pub fn is_null(&self, index: usize) -> Result<bool, ColumnError> {
        self.check(index).map(Value::is_null)
    }

    /// Bytes needed to copy column `index` as text or blob.
    ///
    /// # Errors
    ///
    /// Same checks as [`get`](Self::get), without consuming the column.
    pub fn required_len(&self, index: usize) -> Result<usize, ColumnError> {
        let value = self.check(index)?;
        match value {
            Value::Null => Err(ColumnError::Null(index)),
            Value::Text(s) => Ok(s.len()),
            Value::Blob(b) => Ok(b.len()),
            Value::Timestamp(ts) => Ok(ts.format(TIMESTAMP_FORMAT).to_string().len()),
            other => Err(ColumnError::TypeMismatch {
                index,
                actual: other.sql_type().unwrap_or(SqlType::Blob),
                requested: "bytes",
            }),
        }
    }

    /// Copies a text, timestamp or blob column into `buf`.
    ///
    /// On [`ColumnError::Insufficient`] the column stays unread so the
    /// caller can retry with a larger buffer.
    ///
    /// # Errors
    ///
    /// See [`ColumnError`].
    pub fn read_into(&mut self, index: usize, buf: &mut [u8]) -> Result<usize, ColumnError> {
        let required = self.required_len(index);
        if let Err(ColumnError::Null(_)) = required {
            self.read[index] = true;
        }
        let required = required?;
        if buf.len() < required {
            return Err(ColumnError::Insufficient { required });
        }
        let bytes: Vec<u8> = self.get(index)?;
        buf[..required].copy_from_slice(&bytes);
        Ok(required)
    }

    /// The underlying row, ignoring read tracking.
    #[must_use]
    pub fn row(&self) -> &Row {
        &self.row
    }
}

impl From<Row> for SinkRow {
    fn from(row: Row) -> Self {
        Self::new(row)
    }
}
