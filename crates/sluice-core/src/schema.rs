//! Stream schemas.

use std::sync::Arc;

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::SqlType;

/// Shared, immutable schema handle.
pub type SchemaRef = Arc<StreamSchema>;

/// One column of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name, unique within the stream.
    pub name: String,
    /// Column type.
    pub data_type: SqlType,
    /// Whether NULL is allowed.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Marks the event-time column.
    #[serde(default)]
    pub rowtime: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    /// Nullable column of the given type.
    pub fn new(name: impl Into<String>, data_type: SqlType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            rowtime: false,
        }
    }

    /// Marks the column `NOT NULL`.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Marks the column as the stream's `ROWTIME`. Implies `NOT NULL`.
    #[must_use]
    pub fn rowtime(mut self) -> Self {
        self.rowtime = true;
        self.nullable = false;
        self
    }
}

/// Ordered column list of a stream, with at most one `ROWTIME` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSchema {
    columns: Vec<ColumnDef>,
    rowtime: Option<usize>,
}

impl StreamSchema {
    /// Validates and builds a schema.
    ///
    /// # Errors
    ///
    /// [`Error::Schema`] if the column list is empty, a name repeats, more
    /// than one column is `ROWTIME`, or the `ROWTIME` column is not a
    /// `TIMESTAMP NOT NULL`.
    pub fn new(columns: Vec<ColumnDef>) -> Result<Self> {
        if columns.is_empty() {
            return Err(Error::Schema("a stream needs at least one column".into()));
        }

        let mut seen = AHashSet::with_capacity(columns.len());
        let mut rowtime: Option<usize> = None;
        for (i, col) in columns.iter().enumerate() {
            if !seen.insert(col.name.as_str()) {
                return Err(Error::Schema(format!("duplicate column '{}'", col.name)));
            }
            if col.rowtime {
                if let Some(prev) = rowtime {
                    return Err(Error::Schema(format!(
                        "'{}' and '{}' are both ROWTIME",
                        columns[prev].name, col.name
                    )));
                }
                if col.data_type != SqlType::Timestamp || col.nullable {
                    return Err(Error::Schema(format!(
                        "ROWTIME column '{}' must be TIMESTAMP NOT NULL",
                        col.name
                    )));
                }
                rowtime = Some(i);
            }
        }

        Ok(Self { columns, rowtime })
    }

    /// Columns in declaration order.
    #[must_use]
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Column at `index`.
    #[must_use]
    pub fn column(&self, index: usize) -> Option<&ColumnDef> {
        self.columns.get(index)
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Always false for a validated schema.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Position of the column named `name`.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Position of the `ROWTIME` column.
    #[must_use]
    pub fn rowtime_index(&self) -> Option<usize> {
        self.rowtime
    }
}

impl<'de> Deserialize<'de> for StreamSchema {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let columns = Vec::<ColumnDef>::deserialize(d)?;
        Self::new(columns).map_err(serde::de::Error::custom)
    }
}

impl Serialize for StreamSchema {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.columns.serialize(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade_columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("ts", SqlType::Timestamp).rowtime(),
            ColumnDef::new("ticker", SqlType::Text).not_null(),
            ColumnDef::new("amount", SqlType::Integer).not_null(),
        ]
    }

    #[test]
    fn builds_valid_schema() {
        let schema = StreamSchema::new(trade_columns()).unwrap();
        assert_eq!(schema.len(), 3);
        assert_eq!(schema.rowtime_index(), Some(0));
        assert_eq!(schema.index_of("amount"), Some(2));
        assert_eq!(schema.index_of("missing"), None);
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut cols = trade_columns();
        cols.push(ColumnDef::new("ticker", SqlType::Text));
        let err = StreamSchema::new(cols).unwrap_err();
        assert!(err.to_string().contains("duplicate column 'ticker'"));
    }

    #[test]
    fn rejects_two_rowtimes() {
        let mut cols = trade_columns();
        cols.push(ColumnDef::new("ts2", SqlType::Timestamp).rowtime());
        assert!(StreamSchema::new(cols).is_err());
    }

    #[test]
    fn rowtime_must_be_timestamp() {
        let cols = vec![ColumnDef::new("ts", SqlType::BigInt).rowtime()];
        assert!(StreamSchema::new(cols).is_err());
    }

    #[test]
    fn rejects_empty() {
        assert!(StreamSchema::new(Vec::new()).is_err());
    }

    #[test]
    fn deserializes_with_validation() {
        let json = r#"[
            {"name": "ts", "data_type": "TIMESTAMP", "nullable": false, "rowtime": true},
            {"name": "temperature", "data_type": "FLOAT"}
        ]"#;
        let schema: StreamSchema = serde_json::from_str(json).unwrap();
        assert!(schema.column(1).unwrap().nullable);

        let dup = r#"[{"name": "a", "data_type": "TEXT"}, {"name": "a", "data_type": "TEXT"}]"#;
        assert!(serde_json::from_str::<StreamSchema>(dup).is_err());
    }
}
