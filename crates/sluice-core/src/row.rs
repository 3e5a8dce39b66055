//! Immutable rows.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::schema::StreamSchema;
use crate::time::EventTime;
use crate::types::Value;

#[derive(Debug, PartialEq)]
struct RowInner {
    values: Vec<Value>,
    event_time: Option<EventTime>,
}

/// An immutable tuple of values conforming to a stream schema.
///
/// Cloning is O(1): fan-out to several downstream queues shares one
/// allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Row(Arc<RowInner>);

impl Row {
    /// Validates `values` against `schema` and builds a row.
    ///
    /// Numeric values are converted to the declared numeric column type with
    /// a range check; timestamps may fill `TEXT` columns.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRow`] if the arity differs or a value has a type the
    ///   column cannot hold
    /// - [`Error::NullViolation`] for NULL in a NOT NULL column
    /// - [`Error::Overflow`] if a numeric value does not fit its column
    pub fn try_new(schema: &StreamSchema, values: Vec<Value>) -> Result<Self> {
        if values.len() != schema.len() {
            return Err(Error::InvalidRow(format!(
                "expected {} values, got {}",
                schema.len(),
                values.len()
            )));
        }

        let mut checked = Vec::with_capacity(values.len());
        for (col, value) in schema.columns().iter().zip(values) {
            match value.sql_type() {
                None if !col.nullable => return Err(Error::NullViolation(col.name.clone())),
                None => checked.push(Value::Null),
                Some(ty) if ty == col.data_type => checked.push(value),
                Some(ty) if ty.can_cast_to(col.data_type) => {
                    checked.push(value.cast_to(col.data_type)?);
                }
                Some(ty) => {
                    return Err(Error::InvalidRow(format!(
                        "column '{}' is {}, got {ty}",
                        col.name, col.data_type
                    )));
                }
            }
        }

        let event_time = match schema.rowtime_index() {
            Some(i) => match &checked[i] {
                Value::Timestamp(ts) => Some(EventTime::from_datetime(*ts)?),
                _ => None,
            },
            None => None,
        };

        Ok(Self(Arc::new(RowInner {
            values: checked,
            event_time,
        })))
    }

    /// Value at column `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.values.get(index)
    }

    /// All values in column order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0.values
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.values.len()
    }

    /// True for a zero-column row.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.values.is_empty()
    }

    /// `ROWTIME` of the row when its stream declares one.
    #[must_use]
    pub fn event_time(&self) -> Option<EventTime> {
        self.0.event_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;
    use crate::types::SqlType;
    use chrono::NaiveDate;

    fn schema() -> StreamSchema {
        StreamSchema::new(vec![
            ColumnDef::new("ts", SqlType::Timestamp).rowtime(),
            ColumnDef::new("ticker", SqlType::Text).not_null(),
            ColumnDef::new("amount", SqlType::BigInt),
        ])
        .unwrap()
    }

    fn ts() -> Value {
        Value::Timestamp(
            NaiveDate::from_ymd_opt(2020, 1, 1)
                .unwrap()
                .and_hms_opt(13, 0, 0)
                .unwrap(),
        )
    }

    #[test]
    fn builds_and_widens() {
        let row = Row::try_new(&schema(), vec![ts(), "ORCL".into(), Value::Integer(10)]).unwrap();
        assert_eq!(row.get(2), Some(&Value::BigInt(10)));
        assert!(row.event_time().is_some());
        assert_eq!(row.len(), 3);
    }

    #[test]
    fn null_only_in_nullable_columns() {
        assert!(Row::try_new(&schema(), vec![ts(), "ORCL".into(), Value::Null]).is_ok());
        let err = Row::try_new(&schema(), vec![ts(), Value::Null, Value::Null]).unwrap_err();
        assert_eq!(err, Error::NullViolation("ticker".into()));
    }

    #[test]
    fn rejects_wrong_arity_and_type() {
        assert!(matches!(
            Row::try_new(&schema(), vec![ts()]),
            Err(Error::InvalidRow(_))
        ));
        assert!(matches!(
            Row::try_new(&schema(), vec![ts(), Value::Integer(1), Value::Null]),
            Err(Error::InvalidRow(_))
        ));
    }

    #[test]
    fn clone_shares_storage() {
        let row = Row::try_new(&schema(), vec![ts(), "GOOGL".into(), Value::Null]).unwrap();
        let copy = row.clone();
        assert!(Arc::ptr_eq(&row.0, &copy.0));
    }
}
