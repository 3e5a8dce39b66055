//! # Pump Plans
//!
//! Compiles a pump's `INSERT INTO target (cols) SELECT ... [GROUP BY ...]
//! [FIXED WINDOW]` definition against its input and output schemas, and
//! runs the result one row at a time.
//!
//! Two plan shapes exist:
//!
//! - **Projection**: every input row yields exactly one output row
//! - **Windowed**: input rows fold into tumbling `(window, group)`
//!   accumulators; each finalized group yields one output row
//!
//! Target columns missing from the column list receive NULL and must be
//! nullable. Every produced value is cast to its target column type.

use std::sync::Arc;

use tracing::debug;

use crate::aggregate::{Accumulator, GroupState};
use crate::error::{Error, Result};
use crate::expr::{AggregateFunction, BoundExpr, Expr};
use crate::row::Row;
use crate::schema::{SchemaRef, StreamSchema};
use crate::time::{duration_nanos, EventTime, Watermark};
use crate::types::{SqlType, Value};
use crate::window::{ClosedWindow, GroupKey, WindowManager, WindowSpec};

/// The relational part of a pump definition.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    /// Target columns, aligned with `select`.
    pub target_columns: Vec<String>,
    /// Select list.
    pub select: Vec<Expr>,
    /// Group-by expressions. A `FLOOR_TIME(rowtime, window length)` entry
    /// names the window bucket and adds no extra grouping.
    pub group_by: Vec<Expr>,
    /// Tumbling window; `None` for a plain projection.
    pub window: Option<WindowSpec>,
}

/// Maps produced values onto the target schema.
#[derive(Debug, Clone)]
struct OutputLayout {
    schema: SchemaRef,
    /// For each target column, the select item feeding it.
    sources: Vec<Option<usize>>,
}

impl OutputLayout {
    fn new(
        output: &SchemaRef,
        target_columns: &[String],
        item_types: &[Option<SqlType>],
    ) -> Result<Self> {
        if target_columns.len() != item_types.len() {
            return Err(Error::Query(format!(
                "{} target columns but {} select items",
                target_columns.len(),
                item_types.len()
            )));
        }

        let mut sources = vec![None; output.len()];
        for (item, name) in target_columns.iter().enumerate() {
            let index = output
                .index_of(name)
                .ok_or_else(|| Error::Query(format!("target column '{name}' not found")))?;
            if sources[index].replace(item).is_some() {
                return Err(Error::Query(format!("target column '{name}' listed twice")));
            }
            let col = &output.columns()[index];
            match item_types[item] {
                Some(ty) if !ty.can_cast_to(col.data_type) => {
                    return Err(Error::Query(format!(
                        "cannot insert {ty} into column '{}' of type {}",
                        col.name, col.data_type
                    )));
                }
                None if !col.nullable => {
                    return Err(Error::Query(format!(
                        "cannot insert NULL into NOT NULL column '{}'",
                        col.name
                    )));
                }
                _ => {}
            }
        }

        for (col, source) in output.columns().iter().zip(&sources) {
            if source.is_none() && !col.nullable {
                return Err(Error::Query(format!(
                    "NOT NULL column '{}' is missing from the column list",
                    col.name
                )));
            }
        }

        Ok(Self {
            schema: Arc::clone(output),
            sources,
        })
    }

    fn build(&self, items: &mut [Value]) -> Result<Row> {
        let values = self
            .schema
            .columns()
            .iter()
            .zip(&self.sources)
            .map(|(col, source)| match source {
                Some(i) => std::mem::replace(&mut items[*i], Value::Null).cast_to(col.data_type),
                None => Ok(Value::Null),
            })
            .collect::<Result<Vec<_>>>()?;
        Row::try_new(&self.schema, values)
    }
}

/// Stateless row-to-row plan.
#[derive(Debug, Clone)]
pub struct ProjectionPlan {
    items: Vec<BoundExpr>,
    layout: OutputLayout,
}

/// Where a windowed select item takes its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSlot {
    /// `FLOOR_TIME(rowtime, window length)`: the window start.
    WindowStart,
    /// The `i`-th group-by expression.
    GroupKey(usize),
    /// The `i`-th aggregate call.
    Aggregate(usize),
}

/// Tumbling-window aggregation plan.
#[derive(Debug, Clone)]
pub struct WindowedPlan {
    spec: WindowSpec,
    group_exprs: Vec<BoundExpr>,
    aggregates: Vec<(AggregateFunction, BoundExpr)>,
    calls: Vec<(AggregateFunction, SqlType)>,
    slots: Vec<OutputSlot>,
    layout: OutputLayout,
}

impl WindowedPlan {
    /// Select item sources, in select-list order.
    #[must_use]
    pub fn slots(&self) -> &[OutputSlot] {
        &self.slots
    }

    /// Window definition.
    #[must_use]
    pub fn spec(&self) -> &WindowSpec {
        &self.spec
    }
}

/// Compiled pump query.
#[derive(Debug, Clone)]
pub enum PumpPlan {
    /// One output row per input row.
    Projection(ProjectionPlan),
    /// Grouped tumbling-window aggregation.
    Windowed(WindowedPlan),
}

impl PumpPlan {
    /// Compiles `query` from `input` rows into `output` rows.
    ///
    /// # Errors
    ///
    /// [`Error::Query`] when the select list does not fit the schemas: an
    /// unknown column, an aggregate outside a window, a windowed item that
    /// is neither grouped nor aggregated, or a type that cannot be stored
    /// in its target column.
    pub fn compile(input: &StreamSchema, output: &SchemaRef, query: &QuerySpec) -> Result<Self> {
        match query.window {
            None => Self::compile_projection(input, output, query),
            Some(spec) => Self::compile_windowed(input, output, query, spec),
        }
    }

    fn compile_projection(input: &StreamSchema, output: &SchemaRef, query: &QuerySpec) -> Result<Self> {
        if !query.group_by.is_empty() {
            return Err(Error::Query("GROUP BY requires a FIXED WINDOW".into()));
        }
        if let Some(agg) = query.select.iter().find(|e| e.contains_aggregate()) {
            return Err(Error::Query(format!("aggregate {agg} requires a FIXED WINDOW")));
        }

        let items = query
            .select
            .iter()
            .map(|e| BoundExpr::bind(e, input))
            .collect::<Result<Vec<_>>>()?;
        let types: Vec<_> = items.iter().map(BoundExpr::data_type).collect();
        let layout = OutputLayout::new(output, &query.target_columns, &types)?;

        Ok(Self::Projection(ProjectionPlan { items, layout }))
    }

    fn compile_windowed(
        input: &StreamSchema,
        output: &SchemaRef,
        query: &QuerySpec,
        spec: WindowSpec,
    ) -> Result<Self> {
        let rowtime = input
            .rowtime_index()
            .ok_or_else(|| Error::Query("FIXED WINDOW requires a ROWTIME column on the source stream".into()))?;

        let is_bucket = |e: &Expr| -> Result<bool> {
            let Expr::FloorTime { expr, duration } = e else {
                return Ok(false);
            };
            let bound = BoundExpr::bind(expr, input)?;
            if bound.column_index() != Some(rowtime) {
                return Ok(false);
            }
            if duration_nanos(*duration)? != spec.length_nanos() {
                return Err(Error::Query(format!(
                    "{e} does not match the window length {:?}",
                    spec.length()
                )));
            }
            Ok(true)
        };

        let mut group_sources = Vec::new();
        let mut group_exprs = Vec::new();
        for e in &query.group_by {
            if e.contains_aggregate() {
                return Err(Error::Query(format!("cannot GROUP BY aggregate {e}")));
            }
            if is_bucket(e)? {
                continue;
            }
            group_exprs.push(BoundExpr::bind(e, input)?);
            group_sources.push(e);
        }

        let mut aggregates = Vec::new();
        let mut calls = Vec::new();
        let mut slots = Vec::with_capacity(query.select.len());
        let mut types = Vec::with_capacity(query.select.len());
        for e in &query.select {
            if let Expr::Aggregate { func, arg } = e {
                let bound = BoundExpr::bind(arg, input)?;
                let arg_type = bound.data_type().ok_or_else(|| {
                    Error::Query(format!("{func} over a NULL literal"))
                })?;
                let out = Accumulator::output_type(*func, arg_type).ok_or_else(|| {
                    Error::Query(format!("{func} does not accept {arg_type}"))
                })?;
                slots.push(OutputSlot::Aggregate(aggregates.len()));
                types.push(Some(out));
                calls.push((*func, arg_type));
                aggregates.push((*func, bound));
            } else if e.contains_aggregate() {
                return Err(Error::Query(format!(
                    "expressions over aggregates are not supported: {e}"
                )));
            } else if is_bucket(e)? {
                slots.push(OutputSlot::WindowStart);
                types.push(Some(SqlType::Timestamp));
            } else if let Some(j) = group_sources.iter().position(|g| *g == e) {
                slots.push(OutputSlot::GroupKey(j));
                types.push(group_exprs[j].data_type());
            } else {
                return Err(Error::Query(format!(
                    "{e} must appear in GROUP BY or be an aggregate"
                )));
            }
        }

        let layout = OutputLayout::new(output, &query.target_columns, &types)?;
        Ok(Self::Windowed(WindowedPlan {
            spec,
            group_exprs,
            aggregates,
            calls,
            slots,
            layout,
        }))
    }

    /// Output schema.
    #[must_use]
    pub fn output_schema(&self) -> &SchemaRef {
        match self {
            Self::Projection(p) => &p.layout.schema,
            Self::Windowed(w) => &w.layout.schema,
        }
    }
}

/// Result of one finalized window group.
#[derive(Debug)]
pub enum Emission {
    /// Output row.
    Row(Row),
    /// The group could not be emitted; its state was discarded.
    Aborted {
        /// Start of the window.
        window_start: EventTime,
        /// Group of the window.
        group: GroupKey,
        /// Why it was discarded.
        error: Error,
    },
}

/// What an operator did with one input row.
#[derive(Debug)]
pub enum Outcome {
    /// Row processed; zero or more results are ready.
    Emitted(Vec<Emission>),
    /// Row arrived after its window was finalized and was dropped.
    Late,
}

/// Runs a [`ProjectionPlan`].
#[derive(Debug, Clone)]
pub struct Projector {
    plan: ProjectionPlan,
}

impl Projector {
    /// Wraps a plan.
    #[must_use]
    pub fn new(plan: ProjectionPlan) -> Self {
        Self { plan }
    }

    /// Projects one row.
    ///
    /// # Errors
    ///
    /// Evaluation or cast failure; the row is rejected.
    pub fn project(&self, row: &Row) -> Result<Row> {
        let mut items = self
            .plan
            .items
            .iter()
            .map(|e| e.eval(row))
            .collect::<Result<Vec<_>>>()?;
        self.plan.layout.build(&mut items)
    }
}

/// Runs a [`WindowedPlan`] over its open windows.
#[derive(Debug)]
pub struct WindowAggregator {
    plan: WindowedPlan,
    windows: WindowManager<GroupState>,
}

impl WindowAggregator {
    /// Creates an aggregator with no open windows.
    #[must_use]
    pub fn new(plan: WindowedPlan) -> Self {
        let windows = WindowManager::new(plan.spec);
        Self { plan, windows }
    }

    /// Folds `row` into its window and finalizes the windows it completes.
    ///
    /// # Errors
    ///
    /// Row rejected because its group key or an aggregate argument failed
    /// to evaluate, or because it carries no event time.
    pub fn process(&mut self, row: &Row) -> Result<Outcome> {
        let event_time = row
            .event_time()
            .ok_or_else(|| Error::InvalidRow("row has no ROWTIME".into()))?;
        let group = GroupKey::new(
            self.plan
                .group_exprs
                .iter()
                .map(|e| e.eval(row))
                .collect::<Result<Vec<_>>>()?,
        );

        let Ok(handle) = self.windows.assign(event_time, group) else {
            return Ok(Outcome::Late);
        };

        let args = self
            .plan
            .aggregates
            .iter()
            .map(|(_, e)| e.eval(row))
            .collect::<Result<Vec<_>>>()?;
        let calls = &self.plan.calls;
        self.windows
            .state_mut(&handle, || GroupState::new(calls))
            .update(&args);

        let closed = self.windows.observe(event_time);
        if !closed.is_empty() {
            debug!(
                windows = closed.len(),
                watermark = ?self.windows.watermark().map(|w| w.time()),
                "finalizing windows"
            );
        }
        Ok(Outcome::Emitted(
            closed.into_iter().map(|w| self.finalize(w)).collect(),
        ))
    }

    /// Builds the output row of a finalized window group.
    pub fn finalize(&self, window: ClosedWindow<GroupState>) -> Emission {
        let ClosedWindow { key, state, .. } = window;
        let result = state.finish().map_err(Error::from).and_then(|aggs| {
            let mut items: Vec<Value> = self
                .plan
                .slots
                .iter()
                .map(|slot| match *slot {
                    OutputSlot::WindowStart => Value::Timestamp(key.start.to_datetime()),
                    OutputSlot::GroupKey(j) => {
                        key.group.values().get(j).cloned().unwrap_or(Value::Null)
                    }
                    OutputSlot::Aggregate(i) => aggs.get(i).cloned().unwrap_or(Value::Null),
                })
                .collect();
            self.plan.layout.build(&mut items)
        });
        match result {
            Ok(row) => Emission::Row(row),
            Err(error) => Emission::Aborted {
                window_start: key.start,
                group: key.group,
                error,
            },
        }
    }

    /// Number of open `(window, group)` entries.
    #[must_use]
    pub fn open_windows(&self) -> usize {
        self.windows.open_windows()
    }

    /// Current watermark.
    #[must_use]
    pub fn watermark(&self) -> Option<Watermark> {
        self.windows.watermark()
    }
}

/// Runtime instance of a [`PumpPlan`].
#[derive(Debug)]
pub enum Operator {
    /// Stateless projection.
    Projection(Projector),
    /// Windowed aggregation with open window state.
    Window(WindowAggregator),
}

impl Operator {
    /// Fresh operator with empty window state.
    #[must_use]
    pub fn new(plan: &PumpPlan) -> Self {
        match plan {
            PumpPlan::Projection(p) => Self::Projection(Projector::new(p.clone())),
            PumpPlan::Windowed(w) => Self::Window(WindowAggregator::new(w.clone())),
        }
    }

    /// Processes one input row.
    ///
    /// # Errors
    ///
    /// The row was rejected; operator state is unchanged.
    pub fn process(&mut self, row: &Row) -> Result<Outcome> {
        match self {
            Self::Projection(p) => Ok(Outcome::Emitted(vec![Emission::Row(p.project(row)?)])),
            Self::Window(w) => w.process(row),
        }
    }

    /// Open `(window, group)` entries; zero for projections.
    #[must_use]
    pub fn open_windows(&self) -> usize {
        match self {
            Self::Projection(_) => 0,
            Self::Window(w) => w.open_windows(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::time::Duration;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn trades() -> StreamSchema {
        StreamSchema::new(vec![
            ColumnDef::new("ts", SqlType::Timestamp).rowtime(),
            ColumnDef::new("ticker", SqlType::Text).not_null(),
            ColumnDef::new("amount", SqlType::Integer).not_null(),
        ])
        .unwrap()
    }

    fn trade(ts: NaiveDateTime, ticker: &str, amount: i32) -> Row {
        Row::try_new(
            &trades(),
            vec![Value::Timestamp(ts), ticker.into(), Value::Integer(amount)],
        )
        .unwrap()
    }

    fn avg_sink() -> SchemaRef {
        Arc::new(
            StreamSchema::new(vec![
                ColumnDef::new("ts", SqlType::Timestamp).not_null(),
                ColumnDef::new("ticker", SqlType::Text).not_null(),
                ColumnDef::new("avg_amount", SqlType::Float),
            ])
            .unwrap(),
        )
    }

    fn avg_query(window: u64) -> QuerySpec {
        let bucket = Expr::col("ts").floor_time(Duration::from_secs(window));
        QuerySpec {
            target_columns: vec!["ts".into(), "ticker".into(), "avg_amount".into()],
            select: vec![bucket.clone(), Expr::col("ticker"), Expr::col("amount").avg()],
            group_by: vec![bucket, Expr::col("ticker")],
            window: Some(
                WindowSpec::new(Duration::from_secs(window), Duration::ZERO).unwrap(),
            ),
        }
    }

    fn rows(outcome: Outcome) -> Vec<Row> {
        match outcome {
            Outcome::Emitted(es) => es
                .into_iter()
                .filter_map(|e| match e {
                    Emission::Row(r) => Some(r),
                    Emission::Aborted { .. } => None,
                })
                .collect(),
            Outcome::Late => Vec::new(),
        }
    }

    #[test]
    fn windowed_plan_slots() {
        let plan = PumpPlan::compile(&trades(), &avg_sink(), &avg_query(2)).unwrap();
        let PumpPlan::Windowed(w) = plan else {
            panic!("expected windowed plan");
        };
        assert_eq!(
            w.slots(),
            &[OutputSlot::WindowStart, OutputSlot::GroupKey(0), OutputSlot::Aggregate(0)]
        );
    }

    #[test]
    fn grouped_window_emits_per_group() {
        let plan = PumpPlan::compile(&trades(), &avg_sink(), &avg_query(2)).unwrap();
        let mut op = Operator::new(&plan);

        assert!(rows(op.process(&trade(at(10, 0, 0), "ORCL", 20)).unwrap()).is_empty());
        assert!(rows(op.process(&trade(at(10, 0, 1), "GOOGL", 50)).unwrap()).is_empty());
        assert!(rows(op.process(&trade(at(10, 0, 1), "ORCL", 40)).unwrap()).is_empty());
        let out = rows(op.process(&trade(at(10, 0, 2), "ORCL", 60)).unwrap());

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get(1), Some(&Value::from("GOOGL")));
        assert_eq!(out[0].get(2), Some(&Value::Float(50.0)));
        assert_eq!(out[1].get(0), Some(&Value::Timestamp(at(10, 0, 0))));
        assert_eq!(out[1].get(1), Some(&Value::from("ORCL")));
        assert_eq!(out[1].get(2), Some(&Value::Float(30.0)));
        assert_eq!(op.open_windows(), 1);
    }

    #[test]
    fn late_row_is_dropped() {
        let plan = PumpPlan::compile(&trades(), &avg_sink(), &avg_query(2)).unwrap();
        let mut op = Operator::new(&plan);
        op.process(&trade(at(10, 0, 0), "ORCL", 20)).unwrap();
        op.process(&trade(at(10, 0, 4), "ORCL", 20)).unwrap();
        assert!(matches!(
            op.process(&trade(at(10, 0, 1), "ORCL", 99)).unwrap(),
            Outcome::Late
        ));
    }

    #[test]
    fn projection_fills_unlisted_columns_with_null() {
        let sink = Arc::new(
            StreamSchema::new(vec![
                ColumnDef::new("ticker", SqlType::Text),
                ColumnDef::new("note", SqlType::Text),
                ColumnDef::new("amount", SqlType::BigInt),
            ])
            .unwrap(),
        );
        let query = QuerySpec {
            target_columns: vec!["amount".into(), "ticker".into()],
            select: vec![Expr::col("amount"), Expr::col("ticker")],
            group_by: Vec::new(),
            window: None,
        };
        let plan = PumpPlan::compile(&trades(), &sink, &query).unwrap();
        let out = rows(Operator::new(&plan).process(&trade(at(9, 0, 0), "ORCL", 7)).unwrap());
        assert_eq!(
            out[0].values(),
            &[Value::from("ORCL"), Value::Null, Value::BigInt(7)]
        );
    }

    #[test]
    fn compile_errors() {
        let sink = avg_sink();
        let mut q = avg_query(2);
        q.window = None;
        assert!(PumpPlan::compile(&trades(), &sink, &q).is_err());

        let mut q = avg_query(2);
        q.group_by.pop();
        let err = PumpPlan::compile(&trades(), &sink, &q).unwrap_err();
        assert!(err.to_string().contains("GROUP BY"));

        let mut q = avg_query(2);
        q.select[0] = Expr::col("ts").floor_time(Duration::from_secs(5));
        assert!(PumpPlan::compile(&trades(), &sink, &q).is_err());

        let mut q = avg_query(2);
        q.target_columns.pop();
        q.select.pop();
        assert!(PumpPlan::compile(&trades(), &sink, &q).is_ok());

        let mut q = avg_query(2);
        q.target_columns.remove(1);
        q.select.remove(1);
        let err = PumpPlan::compile(&trades(), &sink, &q).unwrap_err();
        assert!(err.to_string().contains("NOT NULL"));
    }

    #[test]
    fn overflowing_group_is_aborted() {
        let sink = Arc::new(
            StreamSchema::new(vec![ColumnDef::new("total", SqlType::BigInt)]).unwrap(),
        );
        let input = StreamSchema::new(vec![
            ColumnDef::new("ts", SqlType::Timestamp).rowtime(),
            ColumnDef::new("v", SqlType::BigInt),
        ])
        .unwrap();
        let query = QuerySpec {
            target_columns: vec!["total".into()],
            select: vec![Expr::col("v").sum()],
            group_by: Vec::new(),
            window: Some(WindowSpec::new(Duration::from_secs(1), Duration::ZERO).unwrap()),
        };
        let mut op = Operator::new(&PumpPlan::compile(&input, &sink, &query).unwrap());
        let row = |s, v| {
            Row::try_new(&input, vec![Value::Timestamp(at(0, 0, s)), Value::BigInt(v)]).unwrap()
        };
        op.process(&row(0, i64::MAX)).unwrap();
        op.process(&row(0, 1)).unwrap();
        let Outcome::Emitted(es) = op.process(&row(1, 5)).unwrap() else {
            panic!("expected emission");
        };
        assert_eq!(es.len(), 1);
        assert!(matches!(
            &es[0],
            Emission::Aborted { error: Error::Fault(crate::error_codes::RowFault::ArithmeticOverflow), .. }
        ));
    }
}
