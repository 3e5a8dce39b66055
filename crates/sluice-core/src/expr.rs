//! Scalar and aggregate expressions of a pump's `SELECT` list.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::row::Row;
use crate::schema::StreamSchema;
use crate::time::{duration_nanos, EventTime};
use crate::types::{SqlType, Value};

/// Arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        })
    }
}

/// Aggregate function over a window group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateFunction {
    /// Arithmetic mean of non-null inputs.
    Avg,
    /// Sum of non-null inputs.
    Sum,
    /// Count of non-null inputs.
    Count,
    /// Smallest non-null input.
    Min,
    /// Largest non-null input.
    Max,
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Avg => "AVG",
            Self::Sum => "SUM",
            Self::Count => "COUNT",
            Self::Min => "MIN",
            Self::Max => "MAX",
        })
    }
}

/// Unbound expression, referring to input columns by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Input column.
    Column(String),
    /// Constant.
    Literal(Value),
    /// Arithmetic.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `FLOOR_TIME(expr, duration)`.
    FloorTime {
        /// Timestamp operand.
        expr: Box<Expr>,
        /// Bucket length.
        duration: Duration,
    },
    /// Aggregate call, valid only in windowed pumps.
    Aggregate {
        /// Function.
        func: AggregateFunction,
        /// Argument.
        arg: Box<Expr>,
    },
}

impl Expr {
    /// Column reference.
    pub fn col(name: impl Into<String>) -> Self {
        Self::Column(name.into())
    }

    /// Constant.
    pub fn lit(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// `FLOOR_TIME(self, duration)`.
    #[must_use]
    pub fn floor_time(self, duration: Duration) -> Self {
        Self::FloorTime {
            expr: Box::new(self),
            duration,
        }
    }

    /// `func(self)`.
    #[must_use]
    pub fn aggregate(self, func: AggregateFunction) -> Self {
        Self::Aggregate {
            func,
            arg: Box::new(self),
        }
    }

    /// `AVG(self)`.
    #[must_use]
    pub fn avg(self) -> Self {
        self.aggregate(AggregateFunction::Avg)
    }

    /// `SUM(self)`.
    #[must_use]
    pub fn sum(self) -> Self {
        self.aggregate(AggregateFunction::Sum)
    }

    /// `COUNT(self)`.
    #[must_use]
    pub fn count(self) -> Self {
        self.aggregate(AggregateFunction::Count)
    }

    /// `MIN(self)`.
    #[must_use]
    pub fn min(self) -> Self {
        self.aggregate(AggregateFunction::Min)
    }

    /// `MAX(self)`.
    #[must_use]
    pub fn max(self) -> Self {
        self.aggregate(AggregateFunction::Max)
    }

    fn binary(self, op: BinaryOp, right: Self) -> Self {
        Self::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    /// `self + right`.
    #[must_use]
    pub fn add(self, right: Self) -> Self {
        self.binary(BinaryOp::Add, right)
    }

    /// `self - right`.
    #[must_use]
    pub fn sub(self, right: Self) -> Self {
        self.binary(BinaryOp::Sub, right)
    }

    /// `self * right`.
    #[must_use]
    pub fn mul(self, right: Self) -> Self {
        self.binary(BinaryOp::Mul, right)
    }

    /// `self / right`.
    #[must_use]
    pub fn div(self, right: Self) -> Self {
        self.binary(BinaryOp::Div, right)
    }

    /// True if the expression contains an aggregate call anywhere.
    #[must_use]
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Self::Aggregate { .. } => true,
            Self::Column(_) | Self::Literal(_) => false,
            Self::Binary { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Self::FloorTime { expr, .. } => expr.contains_aggregate(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(name) => f.write_str(name),
            Self::Literal(v) => write!(f, "{v}"),
            Self::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            Self::FloorTime { expr, duration } => {
                write!(f, "FLOOR_TIME({expr}, DURATION_SECS({}))", duration.as_secs_f64())
            }
            Self::Aggregate { func, arg } => write!(f, "{func}({arg})"),
        }
    }
}

/// Expression resolved against an input schema.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundExpr {
    /// Input column by position.
    Column {
        /// Column index.
        index: usize,
        /// Column type.
        ty: SqlType,
    },
    /// Constant.
    Literal(Value),
    /// Arithmetic with its result type.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<BoundExpr>,
        /// Right operand.
        right: Box<BoundExpr>,
        /// `BIGINT` for integer operands, otherwise `FLOAT`.
        ty: SqlType,
    },
    /// `FLOOR_TIME` with its bucket length.
    FloorTime {
        /// Timestamp operand.
        expr: Box<BoundExpr>,
        /// Bucket length in nanoseconds.
        length: i64,
    },
}

impl BoundExpr {
    /// Resolves a scalar expression against `schema`.
    ///
    /// # Errors
    ///
    /// [`Error::Query`] for unknown columns, aggregates, arithmetic over
    /// non-numeric operands, or `FLOOR_TIME` over a non-timestamp.
    pub fn bind(expr: &Expr, schema: &StreamSchema) -> Result<Self> {
        match expr {
            Expr::Column(name) => {
                let index = schema
                    .index_of(name)
                    .ok_or_else(|| Error::Query(format!("column '{name}' not found")))?;
                let ty = schema.columns()[index].data_type;
                Ok(Self::Column { index, ty })
            }
            Expr::Literal(v) => Ok(Self::Literal(v.clone())),
            Expr::Binary { op, left, right } => {
                let left = Self::bind(left, schema)?;
                let right = Self::bind(right, schema)?;
                let ty = match (left.data_type(), right.data_type()) {
                    (Some(l), Some(r)) if l.is_integer() && r.is_integer() => SqlType::BigInt,
                    (Some(l), Some(r)) if l.is_numeric() && r.is_numeric() => SqlType::Float,
                    (None, Some(t)) | (Some(t), None) if t.is_numeric() => t,
                    (l, r) => {
                        return Err(Error::Query(format!(
                            "operator {op} needs numeric operands, got {} and {}",
                            type_name(l),
                            type_name(r)
                        )));
                    }
                };
                Ok(Self::Binary {
                    op: *op,
                    left: Box::new(left),
                    right: Box::new(right),
                    ty,
                })
            }
            Expr::FloorTime { expr, duration } => {
                let inner = Self::bind(expr, schema)?;
                if inner.data_type() != Some(SqlType::Timestamp) {
                    return Err(Error::Query(format!(
                        "FLOOR_TIME needs a TIMESTAMP, got {}",
                        type_name(inner.data_type())
                    )));
                }
                let length = duration_nanos(*duration)?;
                if length == 0 {
                    return Err(Error::InvalidWindow(
                        "FLOOR_TIME duration must be positive".into(),
                    ));
                }
                Ok(Self::FloorTime {
                    expr: Box::new(inner),
                    length,
                })
            }
            Expr::Aggregate { func, .. } => Err(Error::Query(format!(
                "aggregate {func} is not allowed here"
            ))),
        }
    }

    /// Result type; `None` for a NULL literal.
    #[must_use]
    pub fn data_type(&self) -> Option<SqlType> {
        match self {
            Self::Column { ty, .. } | Self::Binary { ty, .. } => Some(*ty),
            Self::Literal(v) => v.sql_type(),
            Self::FloorTime { .. } => Some(SqlType::Timestamp),
        }
    }

    /// Evaluates against one row. NULL operands yield NULL.
    ///
    /// # Errors
    ///
    /// [`Error::Overflow`] or [`Error::DivisionByZero`] from arithmetic.
    pub fn eval(&self, row: &Row) -> Result<Value> {
        match self {
            Self::Column { index, .. } => Ok(row.get(*index).cloned().unwrap_or(Value::Null)),
            Self::Literal(v) => Ok(v.clone()),
            Self::Binary {
                op,
                left,
                right,
                ty,
            } => {
                let l = left.eval(row)?;
                let r = right.eval(row)?;
                if l.is_null() || r.is_null() {
                    return Ok(Value::Null);
                }
                if *ty == SqlType::Float {
                    float_op(*op, &l, &r)
                } else {
                    integer_op(*op, &l, &r)
                }
            }
            Self::FloorTime { expr, length } => match expr.eval(row)? {
                Value::Timestamp(ts) => Ok(Value::Timestamp(
                    EventTime::from_datetime(ts)?.floor(*length).to_datetime(),
                )),
                _ => Ok(Value::Null),
            },
        }
    }

    /// Column index when the expression is a bare column reference.
    #[must_use]
    pub fn column_index(&self) -> Option<usize> {
        match self {
            Self::Column { index, .. } => Some(*index),
            _ => None,
        }
    }
}

fn type_name(ty: Option<SqlType>) -> &'static str {
    ty.map_or("NULL", SqlType::sql_name)
}

fn integer_op(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    let (Some(a), Some(b)) = (l.as_i64(), r.as_i64()) else {
        return Err(Error::Query(format!("cannot apply {op} to {l} and {r}")));
    };
    let out = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => {
            if b == 0 {
                return Err(Error::DivisionByZero);
            }
            a.checked_div(b)
        }
    };
    out.map(Value::BigInt)
        .ok_or_else(|| Error::Overflow(format!("{a} {op} {b}")))
}

#[allow(clippy::cast_possible_truncation)]
fn float_op(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
        return Err(Error::Query(format!("cannot apply {op} to {l} and {r}")));
    };
    let out = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(Error::DivisionByZero);
            }
            a / b
        }
    };
    let narrowed = out as f32;
    if !narrowed.is_finite() {
        return Err(Error::Overflow(format!("{a} {op} {b}")));
    }
    Ok(Value::Float(narrowed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;
    use chrono::NaiveDate;

    fn schema() -> StreamSchema {
        StreamSchema::new(vec![
            ColumnDef::new("ts", SqlType::Timestamp).rowtime(),
            ColumnDef::new("temperature", SqlType::Float),
            ColumnDef::new("amount", SqlType::Integer),
            ColumnDef::new("ticker", SqlType::Text),
        ])
        .unwrap()
    }

    fn row(temp: Option<f32>, amount: i32) -> Row {
        let ts = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(10, 0, 7)
            .unwrap();
        Row::try_new(
            &schema(),
            vec![
                Value::Timestamp(ts),
                Value::from(temp),
                Value::Integer(amount),
                Value::from("ORCL"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn fahrenheit_conversion() {
        let e = Expr::lit(32.0_f32).add(Expr::col("temperature").mul(Expr::lit(1.8_f32)));
        let bound = BoundExpr::bind(&e, &schema()).unwrap();
        assert_eq!(bound.data_type(), Some(SqlType::Float));
        let Value::Float(f) = bound.eval(&row(Some(21.3), 1)).unwrap() else {
            panic!("expected float");
        };
        assert!((f - 70.34).abs() < 1e-3);
    }

    #[test]
    fn null_propagates() {
        let e = Expr::col("temperature").add(Expr::lit(1.0_f32));
        let bound = BoundExpr::bind(&e, &schema()).unwrap();
        assert_eq!(bound.eval(&row(None, 1)).unwrap(), Value::Null);
    }

    #[test]
    fn integer_arithmetic_checks() {
        let div = BoundExpr::bind(&Expr::col("amount").div(Expr::lit(0_i64)), &schema()).unwrap();
        assert_eq!(div.eval(&row(None, 5)).unwrap_err(), Error::DivisionByZero);

        let mul = BoundExpr::bind(&Expr::col("amount").mul(Expr::lit(i64::MAX)), &schema()).unwrap();
        assert!(matches!(mul.eval(&row(None, 5)), Err(Error::Overflow(_))));
    }

    #[test]
    fn floor_time_buckets() {
        let e = Expr::col("ts").floor_time(Duration::from_secs(10));
        let bound = BoundExpr::bind(&e, &schema()).unwrap();
        let expected = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        assert_eq!(bound.eval(&row(None, 1)).unwrap(), Value::Timestamp(expected));
    }

    #[test]
    fn bind_errors() {
        let s = schema();
        assert!(BoundExpr::bind(&Expr::col("nope"), &s).is_err());
        assert!(BoundExpr::bind(&Expr::col("ticker").add(Expr::lit(1_i64)), &s).is_err());
        assert!(BoundExpr::bind(&Expr::col("amount").floor_time(Duration::from_secs(1)), &s).is_err());
        assert!(BoundExpr::bind(&Expr::col("amount").avg(), &s).is_err());
    }

    #[test]
    fn expression_display() {
        let e = Expr::col("amount").sum();
        assert_eq!(e.to_string(), "SUM(amount)");
        assert!(e.contains_aggregate());
    }
}
