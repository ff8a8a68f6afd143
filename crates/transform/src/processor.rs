//! Applies a [`SourceTransformationPlan`] to a batch of raw rows.
//!
//! Order is fixed: dataset script, row operations in declared order, then
//! column operations in declared order. The plan is validated in full before
//! the first row is touched.

use std::cmp::Ordering;
use std::collections::HashMap;

use rust_decimal::Decimal;
use unirecon_core::{Row, Value};

use crate::error::TransformationError;
use crate::evaluator::{Evaluators, TransformationEvaluator};
use crate::plan::{
    AggregateOperation, Aggregation, AggregationFunction, ColumnOperation, CombineOperation,
    ComparisonOperator, FilterMode, FilterOperation, PipelineOperation, RoundOperation, RoundingMode,
    RowOperation, SourceTransformationPlan, SplitOperation,
};

pub struct PlanProcessor<'a> {
    evaluators: &'a Evaluators,
}

impl<'a> PlanProcessor<'a> {
    pub fn new(evaluators: &'a Evaluators) -> Self {
        Self { evaluators }
    }

    /// Structural check of every step; stops at the first violation.
    pub fn validate(&self, plan: &SourceTransformationPlan) -> Result<(), TransformationError> {
        if let Some(script) = plan.script() {
            self.evaluators
                .script()?
                .validate_script(script)
                .map_err(|e| e.context("dataset script"))?;
        }
        for (i, op) in plan.row_operations.iter().enumerate() {
            op.validate()
                .map_err(|e| e.context(&format!("row operation {} ({})", i + 1, op.name())))?;
        }
        for (i, op) in plan.column_operations.iter().enumerate() {
            let context = format!("column operation {} ({})", i + 1, op.name());
            op.validate().map_err(|e| e.context(&context))?;
            if let ColumnOperation::Pipeline(pipeline) = op {
                self.evaluators
                    .pipeline()
                    .validate(&pipeline.configuration)
                    .map_err(|e| e.context(&context))?;
            }
        }
        Ok(())
    }

    pub fn apply(&self, plan: &SourceTransformationPlan, rows: Vec<Row>) -> Result<Vec<Row>, TransformationError> {
        self.validate(plan)?;
        let mut rows = rows;

        if let Some(script) = plan.script() {
            let before = rows.len();
            rows = self.evaluators.script()?.run_dataset(script, rows)?;
            log::debug!("dataset script: {} -> {} rows", before, rows.len());
        }

        for op in &plan.row_operations {
            let before = rows.len();
            rows = match op {
                RowOperation::Filter(filter) => apply_filter(filter, rows),
                RowOperation::Aggregate(aggregate) => apply_aggregate(aggregate, rows)?,
                RowOperation::Split(split) => apply_split(split, rows),
            };
            log::debug!("{} operation: {} -> {} rows", op.name(), before, rows.len());
        }

        for op in &plan.column_operations {
            for row in rows.iter_mut() {
                self.apply_column(op, row)
                    .map_err(|e| e.context(&format!("{} operation on '{}'", op.name(), op.target_column())))?;
            }
            log::debug!("{} operation -> column '{}' ({} rows)", op.name(), op.target_column(), rows.len());
        }

        Ok(rows)
    }

    fn apply_column(&self, op: &ColumnOperation, row: &mut Row) -> Result<(), TransformationError> {
        match op {
            ColumnOperation::Combine(combine) => {
                let joined = combine_values(combine, row);
                row.insert(combine.target_column.as_str(), joined);
            }
            ColumnOperation::Pipeline(pipeline) => {
                let out = self.run_pipeline(pipeline, row)?;
                row.insert(pipeline.target_column.as_str(), out);
            }
            ColumnOperation::Round(round) => {
                if let Some(rounded) = round_value(round, row)? {
                    row.insert(round.target_column.as_str(), rounded);
                }
            }
        }
        Ok(())
    }

    fn run_pipeline(&self, op: &PipelineOperation, row: &Row) -> Result<Value, TransformationError> {
        let current = row.value(op.source());
        self.evaluators.pipeline().evaluate(current, row, &op.configuration)
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

fn apply_filter(op: &FilterOperation, rows: Vec<Row>) -> Vec<Row> {
    rows.into_iter()
        .filter(|row| {
            let matches = filter_matches(op, row.value(&op.column));
            match op.mode {
                FilterMode::RetainMatching => matches,
                FilterMode::ExcludeMatching => !matches,
            }
        })
        .collect()
}

fn filter_matches(op: &FilterOperation, value: &Value) -> bool {
    let target = op.value.as_ref().unwrap_or(&Value::Null);
    let ci = op.case_insensitive;
    match op.operator {
        ComparisonOperator::Equals => text_equals(value, target, ci),
        ComparisonOperator::NotEquals => !text_equals(value, target, ci),
        ComparisonOperator::In => op.values.iter().any(|c| text_equals(value, c, ci)),
        ComparisonOperator::NotIn => !op.values.iter().any(|c| text_equals(value, c, ci)),
        ComparisonOperator::IsBlank => value.is_blank(),
        ComparisonOperator::IsNotBlank => !value.is_blank(),
        // non-numeric operands never match
        ComparisonOperator::GreaterThan => numeric_cmp(value, target).is_some_and(Ordering::is_gt),
        ComparisonOperator::GreaterOrEqual => numeric_cmp(value, target).is_some_and(Ordering::is_ge),
        ComparisonOperator::LessThan => numeric_cmp(value, target).is_some_and(Ordering::is_lt),
        ComparisonOperator::LessOrEqual => numeric_cmp(value, target).is_some_and(Ordering::is_le),
    }
}

fn text_equals(left: &Value, right: &Value, case_insensitive: bool) -> bool {
    if left.is_null() || right.is_null() {
        return left.is_null() && right.is_null();
    }
    let (l, r) = (left.to_string(), right.to_string());
    let (l, r) = (l.trim(), r.trim());
    if case_insensitive {
        l.to_lowercase() == r.to_lowercase()
    } else {
        l == r
    }
}

fn numeric_cmp(left: &Value, right: &Value) -> Option<Ordering> {
    Some(left.try_decimal()?.cmp(&right.try_decimal()?))
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

fn apply_aggregate(op: &AggregateOperation, rows: Vec<Row>) -> Result<Vec<Row>, TransformationError> {
    // first-seen order; null and empty text are distinct group keys
    let mut index: HashMap<Vec<Option<String>>, usize> = HashMap::new();
    let mut groups: Vec<(Vec<Option<String>>, Vec<Row>)> = Vec::new();
    for row in rows {
        let key: Vec<Option<String>> = op.group_by.iter().map(|c| row.value(c).to_text()).collect();
        match index.get(&key) {
            Some(&i) => groups[i].1.push(row),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![row]));
            }
        }
    }
    if op.sort_by_group {
        groups.sort_by(|a, b| a.0.cmp(&b.0));
    }

    let mut out = Vec::with_capacity(groups.len());
    for (_, members) in &groups {
        let Some(first) = members.first() else { continue };
        let mut row = Row::new();
        for column in op.group_by.iter().chain(op.retain_columns.iter()) {
            if row.contains(column) {
                continue;
            }
            if let Some(value) = first.get(column) {
                row.insert(column.as_str(), value.clone());
            }
        }
        for aggregation in &op.aggregations {
            let (Some(source), Some(result)) = (aggregation.source(), aggregation.result()) else {
                continue;
            };
            let value = aggregate_values(members, source, aggregation)?;
            row.insert(result, value);
        }
        out.push(row);
    }
    Ok(out)
}

fn aggregate_values(rows: &[Row], column: &str, agg: &Aggregation) -> Result<Value, TransformationError> {
    let present = || present_values(rows, column);
    let value = match agg.function {
        AggregationFunction::Sum => {
            let total = checked_sum(present().filter_map(Value::try_decimal), column)?;
            Value::Decimal(apply_scale(total, agg.scale, agg.rounding_mode))
        }
        AggregationFunction::Avg => {
            let numbers: Vec<Decimal> = present().filter_map(Value::try_decimal).collect();
            if numbers.is_empty() {
                Value::Decimal(Decimal::ZERO)
            } else {
                let total = checked_sum(numbers.iter().copied(), column)?;
                let average = total
                    .checked_div(Decimal::from(numbers.len() as u64))
                    .ok_or_else(|| overflow(column))?;
                Value::Decimal(apply_scale(average, agg.scale, agg.rounding_mode))
            }
        }
        AggregationFunction::Min => extreme(present(), Ordering::Less),
        AggregationFunction::Max => extreme(present(), Ordering::Greater),
        AggregationFunction::Count => Value::Integer(present().count() as i64),
        AggregationFunction::First => present().next().cloned().unwrap_or_default(),
        AggregationFunction::Last => present().last().cloned().unwrap_or_default(),
    };
    Ok(value)
}

fn present_values<'r>(rows: &'r [Row], column: &'r str) -> impl Iterator<Item = &'r Value> + 'r {
    rows.iter().map(move |r| r.value(column)).filter(|v| !v.is_null())
}

fn checked_sum(mut values: impl Iterator<Item = Decimal>, column: &str) -> Result<Decimal, TransformationError> {
    values.try_fold(Decimal::ZERO, |acc, v| acc.checked_add(v).ok_or_else(|| overflow(column)))
}

fn overflow(column: &str) -> TransformationError {
    TransformationError::evaluation(format!("Aggregation overflow on column '{column}'"))
}

/// Numeric ordering when both sides parse, text ordering otherwise. Blanks are ignored.
fn extreme<'v>(values: impl Iterator<Item = &'v Value>, want: Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for value in values.filter(|v| !v.is_blank()) {
        best = match best {
            Some(current) if order_values(value, current) != want => Some(current),
            _ => Some(value),
        };
    }
    best.cloned().unwrap_or_default()
}

fn order_values(left: &Value, right: &Value) -> Ordering {
    match (left.try_decimal(), right.try_decimal()) {
        (Some(l), Some(r)) => l.cmp(&r),
        _ => left.to_string().cmp(&right.to_string()),
    }
}

/// Round to `scale` places and pad trailing zeros, so 150.2 renders as 150.20.
fn apply_scale(value: Decimal, scale: Option<i32>, mode: RoundingMode) -> Decimal {
    match scale {
        Some(scale) if scale >= 0 => {
            let scale = scale as u32;
            let mut rounded = value.round_dp_with_strategy(scale, mode.strategy());
            rounded.rescale(scale);
            rounded
        }
        _ => value,
    }
}

// ---------------------------------------------------------------------------
// Split
// ---------------------------------------------------------------------------

fn apply_split(op: &SplitOperation, rows: Vec<Row>) -> Vec<Row> {
    let target = op.target();
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        // only text is split; other values pass through untouched
        let raw = match row.value(&op.source_column) {
            Value::Text(s) => s.clone(),
            _ => {
                out.push(row);
                continue;
            }
        };
        if raw.trim().is_empty() {
            if !op.drop_empty_values {
                let mut copy = row.clone();
                copy.insert(target, raw);
                out.push(copy);
            }
            continue;
        }
        let mut tokens: Vec<&str> = raw.split(op.delimiter.as_str()).collect();
        // trailing empty tokens are never values
        while tokens.last().is_some_and(|t| t.is_empty()) {
            tokens.pop();
        }
        let mut emitted = false;
        for token in tokens {
            let piece = if op.trim_values { token.trim() } else { token };
            if op.drop_empty_values && piece.trim().is_empty() {
                continue;
            }
            let mut copy = row.clone();
            copy.insert(target, piece);
            out.push(copy);
            emitted = true;
        }
        // a value made only of delimiters survives whole when empties are kept
        if !emitted && !op.drop_empty_values {
            let mut copy = row.clone();
            copy.insert(target, if op.trim_values { raw.trim() } else { raw.as_str() });
            out.push(copy);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Column operations
// ---------------------------------------------------------------------------

fn combine_values(op: &CombineOperation, row: &Row) -> String {
    let parts: Vec<String> = op
        .source_columns
        .iter()
        .map(|c| row.value(c))
        .filter(|v| !v.is_null())
        .map(|v| v.to_string())
        .filter(|s| !(op.skip_blanks && s.trim().is_empty()))
        .collect();
    let mut joined = parts.join(&op.delimiter);
    if let Some(prefix) = op.prefix.as_deref().filter(|p| !p.trim().is_empty()) {
        joined.insert_str(0, prefix);
    }
    if let Some(suffix) = op.suffix.as_deref().filter(|s| !s.trim().is_empty()) {
        joined.push_str(suffix);
    }
    joined
}

/// `None` when the source is blank; non-numeric text is an error.
fn round_value(op: &RoundOperation, row: &Row) -> Result<Option<Value>, TransformationError> {
    let raw = row.value(op.source());
    if raw.is_blank() {
        return Ok(None);
    }
    let number = raw.to_decimal().map_err(|e| {
        TransformationError::with_source(format!("cannot round non-numeric value '{}'", raw), e)
    })?;
    Ok(Some(Value::Decimal(apply_scale(number, Some(op.scale), op.rounding_mode))))
}
