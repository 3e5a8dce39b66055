//! Source rows: name-addressed values awaiting conversion to a stream's schema.
//!
//! A source row is either built column by column from typed values or
//! parsed from a JSON object. Conversion to a [`Row`] happens once the
//! target stream is known; unknown fields are ignored and absent columns
//! become NULL.

use sluice_core::{Row, StreamSchema, Value};

use crate::error::ConnectorError;
use crate::json::json_to_value;

/// A value in a [`SourceRow`].
#[derive(Debug, Clone, PartialEq)]
pub enum SourceValue {
    /// Already typed, from the row builder.
    Typed(Value),
    /// Raw JSON, coerced during conversion.
    Json(serde_json::Value),
}

/// Schema-less row pushed into a source stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRow {
    columns: Vec<(String, SourceValue)>,
}

impl SourceRow {
    /// Starts a row built from typed values.
    #[must_use]
    pub fn builder() -> SourceRowBuilder {
        SourceRowBuilder::default()
    }

    /// Parses a JSON object.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::Serde`] if `text` is not a JSON object.
    pub fn from_json(text: &str) -> Result<Self, ConnectorError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Self::from_json_value(value)
    }

    /// Wraps a parsed JSON object.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::Serde`] for anything other than an object.
    pub fn from_json_value(value: serde_json::Value) -> Result<Self, ConnectorError> {
        match value {
            serde_json::Value::Object(map) => Ok(Self {
                columns: map
                    .into_iter()
                    .map(|(k, v)| (k, SourceValue::Json(v)))
                    .collect(),
            }),
            other => Err(ConnectorError::Serde(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    /// Value of column `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SourceValue> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Number of named values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True when no value is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Converts to a row of `schema`.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::SchemaMismatch`] when a JSON value cannot be
    /// coerced, [`ConnectorError::Core`] when the row violates the schema
    /// (NULL in a NOT NULL column, for example).
    pub fn into_row(mut self, schema: &StreamSchema) -> Result<Row, ConnectorError> {
        let mut values = Vec::with_capacity(schema.len());
        for col in schema.columns() {
            let slot = self
                .columns
                .iter()
                .position(|(n, _)| *n == col.name)
                .map(|i| self.columns.swap_remove(i).1);
            let value = match slot {
                None => Value::Null,
                Some(SourceValue::Typed(v)) => v,
                Some(SourceValue::Json(j)) => json_to_value(&j, col.data_type)
                    .map_err(|e| ConnectorError::SchemaMismatch(format!("column '{}': {e}", col.name)))?,
            };
            values.push(value);
        }
        Ok(Row::try_new(schema, values)?)
    }
}

/// Builder for [`SourceRow`] from typed values.
#[derive(Debug, Clone, Default)]
pub struct SourceRowBuilder {
    columns: Vec<(String, SourceValue)>,
}

impl SourceRowBuilder {
    /// Adds a column.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::DuplicateColumn`] if `name` was already added.
    pub fn add_column(
        mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Self, ConnectorError> {
        let name = name.into();
        if self.columns.iter().any(|(n, _)| *n == name) {
            return Err(ConnectorError::DuplicateColumn(name));
        }
        self.columns.push((name, SourceValue::Typed(value.into())));
        Ok(self)
    }

    /// Finishes the row.
    #[must_use]
    pub fn build(self) -> SourceRow {
        SourceRow {
            columns: self.columns,
        }
    }
}
