//! JSON <-> column value conversion.
//!
//! Incoming JSON is coerced to the declared column type. Timestamps accept
//! epoch milliseconds or any of [`TIMESTAMP_FORMATS`]. Outgoing rows are
//! rendered as one JSON object keyed by column name.

use chrono::{DateTime, NaiveDateTime};
use serde_json::{Map, Number};

use sluice_core::types::TIMESTAMP_FORMAT;
use sluice_core::{Row, SqlType, StreamSchema, Value};

/// Patterns tried, in order, when parsing a string into a `TIMESTAMP`.
pub const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Name of a JSON value's kind, for error messages.
fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn mismatch(value: &serde_json::Value, ty: SqlType) -> String {
    format!("expected {ty}, got {}", json_type_name(value))
}

/// Parses a timestamp from epoch milliseconds or a formatted string.
///
/// # Errors
///
/// Message describing why the value is not a timestamp.
pub fn extract_timestamp(value: &serde_json::Value) -> Result<NaiveDateTime, String> {
    if let Some(ms) = value.as_i64() {
        return DateTime::from_timestamp_millis(ms)
            .map(|d| d.naive_utc())
            .ok_or_else(|| format!("epoch millis {ms} out of range"));
    }

    if let Some(s) = value.as_str() {
        let s = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.naive_utc());
        }
        for fmt in TIMESTAMP_FORMATS {
            if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
                return Ok(ndt);
            }
        }
        return Err(format!("cannot parse timestamp from string: {s}"));
    }

    Err(mismatch(value, SqlType::Timestamp))
}

/// Coerces a JSON value into a column value of type `ty`.
///
/// # Errors
///
/// Message describing the mismatch or overflow.
#[allow(clippy::cast_possible_truncation)]
pub fn json_to_value(value: &serde_json::Value, ty: SqlType) -> Result<Value, String> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let out_of_range = || format!("{value} out of range for {ty}");
    match ty {
        SqlType::SmallInt | SqlType::Integer | SqlType::BigInt | SqlType::UnsignedInteger => {
            let n = value.as_i64().ok_or_else(|| mismatch(value, ty))?;
            match ty {
                SqlType::SmallInt => i16::try_from(n).map(Value::SmallInt).map_err(|_| out_of_range()),
                SqlType::Integer => i32::try_from(n).map(Value::Integer).map_err(|_| out_of_range()),
                SqlType::UnsignedInteger => u32::try_from(n)
                    .map(Value::UnsignedInteger)
                    .map_err(|_| out_of_range()),
                _ => Ok(Value::BigInt(n)),
            }
        }
        SqlType::Float => {
            let f = value.as_f64().ok_or_else(|| mismatch(value, ty))?;
            let narrowed = f as f32;
            if narrowed.is_finite() {
                Ok(Value::Float(narrowed))
            } else {
                Err(out_of_range())
            }
        }
        SqlType::Boolean => value
            .as_bool()
            .map(Value::Boolean)
            .ok_or_else(|| mismatch(value, ty)),
        SqlType::Text => value
            .as_str()
            .map(|s| Value::Text(s.to_owned()))
            .ok_or_else(|| mismatch(value, ty)),
        SqlType::Blob => match value {
            serde_json::Value::String(s) => Ok(Value::Blob(s.as_bytes().to_vec())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|b| {
                    b.as_u64()
                        .and_then(|n| u8::try_from(n).ok())
                        .ok_or_else(|| format!("blob element {b} is not a byte"))
                })
                .collect::<Result<Vec<u8>, String>>()
                .map(Value::Blob),
            other => Err(mismatch(other, ty)),
        },
        SqlType::Timestamp => extract_timestamp(value).map(Value::Timestamp),
    }
}

/// Renders a column value as JSON.
#[must_use]
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::SmallInt(v) => (*v).into(),
        Value::Integer(v) => (*v).into(),
        Value::BigInt(v) => (*v).into(),
        Value::UnsignedInteger(v) => (*v).into(),
        Value::Float(v) => Number::from_f64(f64::from(*v))
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Boolean(v) => (*v).into(),
        Value::Text(v) => v.clone().into(),
        Value::Blob(v) => v.iter().map(|b| serde_json::Value::from(*b)).collect(),
        Value::Timestamp(ts) => ts.format(TIMESTAMP_FORMAT).to_string().into(),
    }
}

/// Renders a row as a JSON object keyed by column name.
#[must_use]
pub fn row_to_json(row: &Row, schema: &StreamSchema) -> serde_json::Value {
    let object: Map<String, serde_json::Value> = schema
        .columns()
        .iter()
        .zip(row.values())
        .map(|(col, v)| (col.name.clone(), value_to_json(v)))
        .collect();
    serde_json::Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use sluice_core::ColumnDef;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn timestamp_formats() {
        assert_eq!(extract_timestamp(&json!("2022-01-01 12:00:00.000000000")).unwrap(), noon());
        assert_eq!(extract_timestamp(&json!("2022-01-01 12:00:00")).unwrap(), noon());
        assert_eq!(extract_timestamp(&json!("2022-01-01T12:00:00Z")).unwrap(), noon());
        assert_eq!(extract_timestamp(&json!(1_641_038_400_000_i64)).unwrap(), noon());
        assert!(extract_timestamp(&json!("yesterday")).is_err());
        assert!(extract_timestamp(&json!(true)).is_err());
    }

    #[test]
    fn coerces_numbers() {
        assert_eq!(json_to_value(&json!(7), SqlType::SmallInt).unwrap(), Value::SmallInt(7));
        assert!(json_to_value(&json!(70_000), SqlType::SmallInt).is_err());
        assert!(json_to_value(&json!(-1), SqlType::UnsignedInteger).is_err());
        assert_eq!(json_to_value(&json!(21.5), SqlType::Float).unwrap(), Value::Float(21.5));
        assert_eq!(json_to_value(&json!(3), SqlType::Float).unwrap(), Value::Float(3.0));
        assert!(json_to_value(&json!("3"), SqlType::Integer).is_err());
        assert!(json_to_value(&json!(1e300), SqlType::Float).is_err());
    }

    #[test]
    fn null_and_text() {
        assert_eq!(json_to_value(&json!(null), SqlType::Text).unwrap(), Value::Null);
        assert_eq!(json_to_value(&json!("ORCL"), SqlType::Text).unwrap(), Value::from("ORCL"));
        assert_eq!(
            json_to_value(&json!([1, 2, 255]), SqlType::Blob).unwrap(),
            Value::Blob(vec![1, 2, 255])
        );
        assert!(json_to_value(&json!([256]), SqlType::Blob).is_err());
    }

    #[test]
    fn renders_rows() {
        let schema = StreamSchema::new(vec![
            ColumnDef::new("ts", SqlType::Timestamp).rowtime(),
            ColumnDef::new("temperature", SqlType::Float),
        ])
        .unwrap();
        let row = Row::try_new(&schema, vec![Value::Timestamp(noon()), Value::Float(70.5)]).unwrap();
        assert_eq!(
            row_to_json(&row, &schema),
            json!({"ts": "2022-01-01 12:00:00.000000000", "temperature": 70.5})
        );
    }
}
