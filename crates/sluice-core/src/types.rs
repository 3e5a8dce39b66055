//! SQL column types and runtime values.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Text rendering used for `TIMESTAMP` values read as text.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Column type of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SqlType {
    /// 16-bit signed integer.
    #[serde(rename = "SMALLINT")]
    SmallInt,
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer.
    #[serde(rename = "BIGINT")]
    BigInt,
    /// 32-bit unsigned integer.
    #[serde(rename = "UNSIGNED INTEGER")]
    UnsignedInteger,
    /// 32-bit float.
    Float,
    /// Boolean.
    Boolean,
    /// UTF-8 text.
    Text,
    /// Raw bytes.
    Blob,
    /// Timestamp without time zone, nanosecond precision.
    Timestamp,
}

impl SqlType {
    /// Integer types.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::SmallInt | Self::Integer | Self::BigInt | Self::UnsignedInteger
        )
    }

    /// Integer or float types.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        self.is_integer() || matches!(self, Self::Float)
    }

    /// SQL spelling of the type.
    #[must_use]
    pub const fn sql_name(self) -> &'static str {
        match self {
            Self::SmallInt => "SMALLINT",
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::UnsignedInteger => "UNSIGNED INTEGER",
            Self::Float => "FLOAT",
            Self::Boolean => "BOOLEAN",
            Self::Text => "TEXT",
            Self::Blob => "BLOB",
            Self::Timestamp => "TIMESTAMP",
        }
    }

    /// Whether a value of `self` may be stored in a column of type `target`.
    ///
    /// Numeric types convert into each other with a range check at runtime.
    /// Timestamps may be stored as text.
    #[must_use]
    pub fn can_cast_to(self, target: Self) -> bool {
        self == target
            || (self.is_numeric() && target.is_numeric())
            || (self == Self::Timestamp && target == Self::Text)
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

impl FromStr for SqlType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_ascii_uppercase().as_str() {
            "SMALLINT" => Ok(Self::SmallInt),
            "INTEGER" | "INT" => Ok(Self::Integer),
            "BIGINT" => Ok(Self::BigInt),
            "UNSIGNED INTEGER" | "UNSIGNED INT" => Ok(Self::UnsignedInteger),
            "FLOAT" | "REAL" => Ok(Self::Float),
            "BOOLEAN" | "BOOL" => Ok(Self::Boolean),
            "TEXT" => Ok(Self::Text),
            "BLOB" => Ok(Self::Blob),
            "TIMESTAMP" => Ok(Self::Timestamp),
            _ => Err(Error::Schema(format!("unknown column type '{s}'"))),
        }
    }
}

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// `SMALLINT`
    SmallInt(i16),
    /// `INTEGER`
    Integer(i32),
    /// `BIGINT`
    BigInt(i64),
    /// `UNSIGNED INTEGER`
    UnsignedInteger(u32),
    /// `FLOAT`
    Float(f32),
    /// `BOOLEAN`
    Boolean(bool),
    /// `TEXT`
    Text(String),
    /// `BLOB`
    Blob(Vec<u8>),
    /// `TIMESTAMP`
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Type of the value, `None` for NULL.
    #[must_use]
    pub fn sql_type(&self) -> Option<SqlType> {
        Some(match self {
            Self::Null => return None,
            Self::SmallInt(_) => SqlType::SmallInt,
            Self::Integer(_) => SqlType::Integer,
            Self::BigInt(_) => SqlType::BigInt,
            Self::UnsignedInteger(_) => SqlType::UnsignedInteger,
            Self::Float(_) => SqlType::Float,
            Self::Boolean(_) => SqlType::Boolean,
            Self::Text(_) => SqlType::Text,
            Self::Blob(_) => SqlType::Blob,
            Self::Timestamp(_) => SqlType::Timestamp,
        })
    }

    /// True for SQL NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer payload widened to `i64`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::SmallInt(v) => Some(i64::from(*v)),
            Self::Integer(v) => Some(i64::from(*v)),
            Self::BigInt(v) => Some(*v),
            Self::UnsignedInteger(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Numeric payload as `f64`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(f64::from(*v)),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Timestamp payload.
    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Converts the value to `target`.
    ///
    /// NULL casts to NULL. Numeric conversions fail with
    /// [`Error::Overflow`] when the value does not fit.
    pub fn cast_to(&self, target: SqlType) -> Result<Self> {
        let Some(source) = self.sql_type() else {
            return Ok(Self::Null);
        };
        if source == target {
            return Ok(self.clone());
        }
        match (self, target) {
            (Self::Float(v), t) if t.is_integer() => {
                if !v.is_finite() {
                    return Err(Error::Overflow(format!("{v} does not fit {target}")));
                }
                #[allow(clippy::cast_possible_truncation)]
                let truncated = v.trunc() as f64 as i64;
                if f64::from(v.trunc()) != truncated as f64 {
                    return Err(Error::Overflow(format!("{v} does not fit {target}")));
                }
                integer_to(truncated, target)
            }
            (v, SqlType::Float) if source.is_integer() => {
                #[allow(clippy::cast_precision_loss)]
                let f = v.as_i64().unwrap_or_default() as f32;
                Ok(Self::Float(f))
            }
            (v, t) if source.is_integer() && t.is_integer() => {
                integer_to(v.as_i64().unwrap_or_default(), t)
            }
            (Self::Timestamp(ts), SqlType::Text) => {
                Ok(Self::Text(ts.format(TIMESTAMP_FORMAT).to_string()))
            }
            _ => Err(Error::Cast {
                value: self.to_string(),
                target,
            }),
        }
    }

    /// Total order across values, used for group keys and MIN/MAX.
    ///
    /// NULL sorts first. Values of different types order by type rank,
    /// numeric values compare by magnitude, and floats use IEEE total order.
    #[must_use]
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Null, _) => Ordering::Less,
            (_, Self::Null) => Ordering::Greater,
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (a, b) if a.as_i64().is_some() && b.as_i64().is_some() => {
                a.as_i64().cmp(&b.as_i64())
            }
            (a, b) if a.as_f64().is_some() && b.as_f64().is_some() => {
                let (x, y) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
                x.total_cmp(&y)
            }
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Blob(a), Self::Blob(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::SmallInt(_)
            | Self::Integer(_)
            | Self::BigInt(_)
            | Self::UnsignedInteger(_)
            | Self::Float(_) => 1,
            Self::Boolean(_) => 2,
            Self::Text(_) => 3,
            Self::Blob(_) => 4,
            Self::Timestamp(_) => 5,
        }
    }
}

fn integer_to(v: i64, target: SqlType) -> Result<Value> {
    let overflow = || Error::Overflow(format!("{v} does not fit {target}"));
    match target {
        SqlType::SmallInt => i16::try_from(v).map(Value::SmallInt).map_err(|_| overflow()),
        SqlType::Integer => i32::try_from(v).map(Value::Integer).map_err(|_| overflow()),
        SqlType::BigInt => Ok(Value::BigInt(v)),
        SqlType::UnsignedInteger => u32::try_from(v)
            .map(Value::UnsignedInteger)
            .map_err(|_| overflow()),
        _ => Err(Error::Cast {
            value: v.to_string(),
            target,
        }),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::SmallInt(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::BigInt(v) => write!(f, "{v}"),
            Self::UnsignedInteger(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "'{v}'"),
            Self::Blob(v) => write!(f, "<{} bytes>", v.len()),
            Self::Timestamp(v) => write!(f, "{}", v.format(TIMESTAMP_FORMAT)),
        }
    }
}

macro_rules! impl_from_native {
    ($($native:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$native> for Value {
                fn from(v: $native) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

impl_from_native!(
    i16 => SmallInt,
    i32 => Integer,
    i64 => BigInt,
    u32 => UnsignedInteger,
    f32 => Float,
    bool => Boolean,
    String => Text,
    Vec<u8> => Blob,
    NaiveDateTime => Timestamp,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn parses_type_names() {
        assert_eq!("integer".parse::<SqlType>().unwrap(), SqlType::Integer);
        assert_eq!(
            "UNSIGNED   INTEGER".parse::<SqlType>().unwrap(),
            SqlType::UnsignedInteger
        );
        assert_eq!("TIMESTAMP".parse::<SqlType>().unwrap(), SqlType::Timestamp);
        assert!("DECIMAL".parse::<SqlType>().is_err());
    }

    #[test]
    fn integer_cast_checks_range() {
        assert_eq!(
            Value::BigInt(12).cast_to(SqlType::SmallInt).unwrap(),
            Value::SmallInt(12)
        );
        assert!(matches!(
            Value::BigInt(70_000).cast_to(SqlType::SmallInt),
            Err(Error::Overflow(_))
        ));
        assert!(matches!(
            Value::Integer(-1).cast_to(SqlType::UnsignedInteger),
            Err(Error::Overflow(_))
        ));
    }

    #[test]
    fn float_cast_truncates_and_checks_range() {
        assert_eq!(
            Value::Float(41.9).cast_to(SqlType::Integer).unwrap(),
            Value::Integer(41)
        );
        assert!(Value::Float(f32::INFINITY)
            .cast_to(SqlType::BigInt)
            .is_err());
        assert!(Value::Float(1.0e12).cast_to(SqlType::Integer).is_err());
        assert_eq!(
            Value::Integer(3).cast_to(SqlType::Float).unwrap(),
            Value::Float(3.0)
        );
    }

    #[test]
    fn timestamp_casts_to_text_only() {
        let v = Value::Timestamp(ts(13, 0, 10));
        assert_eq!(
            v.cast_to(SqlType::Text).unwrap(),
            Value::Text("2020-01-01 13:00:10.000000000".into())
        );
        assert!(matches!(
            v.cast_to(SqlType::BigInt),
            Err(Error::Cast { .. })
        ));
        assert_eq!(Value::Null.cast_to(SqlType::Blob).unwrap(), Value::Null);
    }

    #[test]
    fn total_order_across_kinds() {
        assert_eq!(Value::Null.total_cmp(&Value::Integer(0)), Ordering::Less);
        assert_eq!(
            Value::SmallInt(5).total_cmp(&Value::BigInt(5)),
            Ordering::Equal
        );
        assert_eq!(
            Value::Float(1.5).total_cmp(&Value::Integer(2)),
            Ordering::Less
        );
        assert_eq!(
            Value::from("GOOGL").total_cmp(&Value::from("ORCL")),
            Ordering::Less
        );
        assert_eq!(
            Value::Float(f32::NAN).total_cmp(&Value::Float(f32::NAN)),
            Ordering::Equal
        );
    }

    #[test]
    fn option_converts_to_null() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some(7_i64)), Value::BigInt(7));
    }
}
