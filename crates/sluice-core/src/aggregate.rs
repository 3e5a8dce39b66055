//! Incremental aggregate accumulators.
//!
//! Each open `(window, group)` holds one [`GroupState`]: a slot per
//! aggregate call in the `SELECT` list. NULL inputs are skipped. An
//! overflow poisons the group; its window result is then discarded instead
//! of being emitted with a wrong value.

use crate::error_codes::RowFault;
use crate::expr::AggregateFunction;
use crate::types::{SqlType, Value};

#[derive(Debug, Clone, Copy)]
enum Sum {
    Int(i64),
    Float(f64),
}

impl Sum {
    fn zero(arg: SqlType) -> Self {
        if arg.is_integer() {
            Self::Int(0)
        } else {
            Self::Float(0.0)
        }
    }

    fn add(&mut self, v: &Value) -> Result<(), RowFault> {
        match self {
            Self::Int(acc) => {
                let x = v.as_i64().ok_or(RowFault::TypeMismatch)?;
                *acc = acc.checked_add(x).ok_or(RowFault::ArithmeticOverflow)?;
            }
            Self::Float(acc) => {
                let x = v.as_f64().ok_or(RowFault::TypeMismatch)?;
                let next = *acc + x;
                if !next.is_finite() {
                    return Err(RowFault::ArithmeticOverflow);
                }
                *acc = next;
            }
        }
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }
}

#[derive(Debug, Clone)]
enum State {
    Avg { sum: Sum, count: u64 },
    Sum { sum: Sum, seen: bool },
    Count(u64),
    Min(Option<Value>),
    Max(Option<Value>),
}

/// Running state of one aggregate call.
#[derive(Debug, Clone)]
pub struct Accumulator {
    func: AggregateFunction,
    arg_type: SqlType,
    state: State,
}

impl Accumulator {
    /// Empty accumulator for `func` over an argument of `arg_type`.
    #[must_use]
    pub fn new(func: AggregateFunction, arg_type: SqlType) -> Self {
        let state = match func {
            AggregateFunction::Avg => State::Avg {
                sum: Sum::zero(arg_type),
                count: 0,
            },
            AggregateFunction::Sum => State::Sum {
                sum: Sum::zero(arg_type),
                seen: false,
            },
            AggregateFunction::Count => State::Count(0),
            AggregateFunction::Min => State::Min(None),
            AggregateFunction::Max => State::Max(None),
        };
        Self {
            func,
            arg_type,
            state,
        }
    }

    /// Result type of `func` applied to `arg_type`, `None` if unsupported.
    #[must_use]
    pub fn output_type(func: AggregateFunction, arg_type: SqlType) -> Option<SqlType> {
        match func {
            AggregateFunction::Count => Some(SqlType::BigInt),
            AggregateFunction::Avg if arg_type.is_numeric() => Some(SqlType::Float),
            AggregateFunction::Sum if arg_type.is_integer() => Some(SqlType::BigInt),
            AggregateFunction::Sum if arg_type.is_numeric() => Some(SqlType::Float),
            AggregateFunction::Min | AggregateFunction::Max
                if !matches!(arg_type, SqlType::Blob) =>
            {
                Some(arg_type)
            }
            _ => None,
        }
    }

    /// Folds one input value in.
    ///
    /// # Errors
    ///
    /// [`RowFault::ArithmeticOverflow`] when a running sum overflows.
    pub fn update(&mut self, v: &Value) -> Result<(), RowFault> {
        if v.is_null() {
            return Ok(());
        }
        match &mut self.state {
            State::Avg { sum, count } => {
                sum.add(v)?;
                *count += 1;
            }
            State::Sum { sum, seen } => {
                sum.add(v)?;
                *seen = true;
            }
            State::Count(n) => *n += 1,
            State::Min(cur) => {
                if cur.as_ref().map_or(true, |c| v.total_cmp(c).is_lt()) {
                    *cur = Some(v.clone());
                }
            }
            State::Max(cur) => {
                if cur.as_ref().map_or(true, |c| v.total_cmp(c).is_gt()) {
                    *cur = Some(v.clone());
                }
            }
        }
        Ok(())
    }

    /// Final value. Empty `AVG`, `SUM`, `MIN` and `MAX` yield NULL.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn evaluate(&self) -> Value {
        match &self.state {
            State::Avg { count: 0, .. } | State::Sum { seen: false, .. } => Value::Null,
            State::Avg { sum, count } => Value::Float((sum.as_f64() / *count as f64) as f32),
            State::Sum { sum: Sum::Int(v), .. } => Value::BigInt(*v),
            State::Sum {
                sum: Sum::Float(v), ..
            } => Value::Float(*v as f32),
            State::Count(n) => Value::BigInt(i64::try_from(*n).unwrap_or(i64::MAX)),
            State::Min(v) | State::Max(v) => v.clone().unwrap_or(Value::Null),
        }
    }

    /// The aggregate function.
    #[must_use]
    pub fn function(&self) -> AggregateFunction {
        self.func
    }

    /// Argument type.
    #[must_use]
    pub fn arg_type(&self) -> SqlType {
        self.arg_type
    }
}

/// Accumulators of one open `(window, group)`.
#[derive(Debug, Clone)]
pub struct GroupState {
    accumulators: Vec<Accumulator>,
    fault: Option<RowFault>,
}

impl GroupState {
    /// Group state with one accumulator per `(function, argument type)`.
    #[must_use]
    pub fn new(calls: &[(AggregateFunction, SqlType)]) -> Self {
        Self {
            accumulators: calls
                .iter()
                .map(|(f, ty)| Accumulator::new(*f, *ty))
                .collect(),
            fault: None,
        }
    }

    /// Folds one row's aggregate arguments in, in call order.
    ///
    /// After the first fault the group stops accumulating.
    pub fn update(&mut self, args: &[Value]) {
        if self.fault.is_some() {
            return;
        }
        for (acc, v) in self.accumulators.iter_mut().zip(args) {
            if let Err(fault) = acc.update(v) {
                self.fault = Some(fault);
                return;
            }
        }
    }

    /// Fault that poisoned this group, if any.
    #[must_use]
    pub fn fault(&self) -> Option<RowFault> {
        self.fault
    }

    /// Final aggregate values, or the poisoning fault.
    ///
    /// # Errors
    ///
    /// The first fault recorded by [`update`](Self::update).
    pub fn finish(&self) -> Result<Vec<Value>, RowFault> {
        match self.fault {
            Some(fault) => Err(fault),
            None => Ok(self.accumulators.iter().map(Accumulator::evaluate).collect()),
        }
    }
}
