//! Source transformation plans: an optional dataset script, row operations,
//! then column operations.
//!
//! Operations are sum types keyed by a `type` discriminator so a plan can never
//! carry two half-filled operation configs at once.

use rust_decimal::RoundingStrategy;
use serde::{Deserialize, Deserializer, Serialize};
use unirecon_core::Value;

use crate::error::TransformationError;

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceTransformationPlan {
    /// Lua run over the whole row set before any other step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_script: Option<String>,
    pub row_operations: Vec<RowOperation>,
    pub column_operations: Vec<ColumnOperation>,
}

impl SourceTransformationPlan {
    pub fn from_toml(input: &str) -> Result<Self, TransformationError> {
        toml::from_str(input)
            .map_err(|e| TransformationError::Validation(format!("invalid transformation plan: {e}")))
    }

    pub fn from_json(input: &str) -> Result<Self, TransformationError> {
        serde_json::from_str(input)
            .map_err(|e| TransformationError::Validation(format!("invalid transformation plan: {e}")))
    }

    pub fn is_empty(&self) -> bool {
        self.script().is_none() && self.row_operations.is_empty() && self.column_operations.is_empty()
    }

    /// The dataset script, if one is set and not blank.
    pub fn script(&self) -> Option<&str> {
        self.dataset_script.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// True when no step can change the number of rows.
    pub fn preserves_cardinality(&self) -> bool {
        self.script().is_none() && self.row_operations.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Row operations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RowOperation {
    Filter(FilterOperation),
    Aggregate(AggregateOperation),
    Split(SplitOperation),
}

impl RowOperation {
    pub fn name(&self) -> &'static str {
        match self {
            RowOperation::Filter(_) => "filter",
            RowOperation::Aggregate(_) => "aggregate",
            RowOperation::Split(_) => "split",
        }
    }

    pub fn validate(&self) -> Result<(), TransformationError> {
        match self {
            RowOperation::Filter(op) => op.validate(),
            RowOperation::Aggregate(op) => op.validate(),
            RowOperation::Split(op) => op.validate(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    #[default]
    RetainMatching,
    ExcludeMatching,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    #[default]
    Equals,
    NotEquals,
    In,
    NotIn,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    IsBlank,
    IsNotBlank,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOperation {
    pub column: String,
    pub operator: ComparisonOperator,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Value>,
    pub case_insensitive: bool,
    pub mode: FilterMode,
}

impl FilterOperation {
    fn validate(&self) -> Result<(), TransformationError> {
        if self.column.trim().is_empty() {
            return Err(TransformationError::validation("Filter column is required"));
        }
        if matches!(self.operator, ComparisonOperator::In | ComparisonOperator::NotIn) && self.values.is_empty() {
            return Err(TransformationError::validation("IN/NOT_IN filter requires at least one value"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateOperation {
    pub group_by: Vec<String>,
    pub aggregations: Vec<Aggregation>,
    /// Non-aggregated columns copied from the first row of each group.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub retain_columns: Vec<String>,
    pub sort_by_group: bool,
}

impl AggregateOperation {
    fn validate(&self) -> Result<(), TransformationError> {
        if self.group_by.iter().all(|c| c.trim().is_empty()) {
            return Err(TransformationError::validation("Aggregate operation requires groupBy columns"));
        }
        if self.aggregations.is_empty() {
            return Err(TransformationError::validation(
                "Aggregate operation requires at least one aggregation",
            ));
        }
        for aggregation in &self.aggregations {
            if aggregation.source().is_none() {
                return Err(TransformationError::validation(
                    "Aggregation requires source or result column",
                ));
            }
            if aggregation.scale.is_some_and(|s| s < 0) {
                return Err(TransformationError::validation("Aggregation scale cannot be negative"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationFunction {
    #[default]
    Sum,
    Avg,
    Min,
    Max,
    Count,
    First,
    Last,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Aggregation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_column: Option<String>,
    pub function: AggregationFunction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<i32>,
    pub rounding_mode: RoundingMode,
}

impl Aggregation {
    /// Column read from; falls back to the result column.
    pub fn source(&self) -> Option<&str> {
        non_blank(&self.source_column).or_else(|| non_blank(&self.result_column))
    }

    /// Column written to; falls back to the source column.
    pub fn result(&self) -> Option<&str> {
        non_blank(&self.result_column).or_else(|| non_blank(&self.source_column))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitOperation {
    pub source_column: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_column: Option<String>,
    pub delimiter: String,
    pub trim_values: bool,
    pub drop_empty_values: bool,
}

impl Default for SplitOperation {
    fn default() -> Self {
        Self {
            source_column: String::new(),
            target_column: None,
            delimiter: ",".into(),
            trim_values: true,
            drop_empty_values: true,
        }
    }
}

impl SplitOperation {
    pub fn target(&self) -> &str {
        non_blank(&self.target_column).unwrap_or(&self.source_column)
    }

    fn validate(&self) -> Result<(), TransformationError> {
        if self.source_column.trim().is_empty() {
            return Err(TransformationError::validation("Split operation requires a source column"));
        }
        if self.delimiter.is_empty() {
            return Err(TransformationError::validation("Split operation requires a delimiter"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Column operations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnOperation {
    Combine(CombineOperation),
    Pipeline(PipelineOperation),
    Round(RoundOperation),
}

impl ColumnOperation {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnOperation::Combine(_) => "combine",
            ColumnOperation::Pipeline(_) => "pipeline",
            ColumnOperation::Round(_) => "round",
        }
    }

    pub fn target_column(&self) -> &str {
        match self {
            ColumnOperation::Combine(op) => &op.target_column,
            ColumnOperation::Pipeline(op) => &op.target_column,
            ColumnOperation::Round(op) => &op.target_column,
        }
    }

    /// Structural checks only; pipeline JSON is checked by the processor.
    pub fn validate(&self) -> Result<(), TransformationError> {
        match self {
            ColumnOperation::Combine(op) => {
                if op.target_column.trim().is_empty() {
                    return Err(TransformationError::validation("Combine operation requires a target column"));
                }
                if op.source_columns.is_empty() {
                    return Err(TransformationError::validation("Combine operation requires source columns"));
                }
            }
            ColumnOperation::Pipeline(op) => {
                if op.target_column.trim().is_empty() {
                    return Err(TransformationError::validation("Pipeline operation requires a target column"));
                }
                if op.configuration.trim().is_empty() {
                    return Err(TransformationError::validation("Pipeline configuration JSON is required"));
                }
            }
            ColumnOperation::Round(op) => {
                if op.target_column.trim().is_empty() {
                    return Err(TransformationError::validation("Round operation requires a target column"));
                }
                if op.scale < 0 {
                    return Err(TransformationError::validation("Round operation scale cannot be negative"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombineOperation {
    pub target_column: String,
    #[serde(alias = "sources")]
    pub source_columns: Vec<String>,
    pub delimiter: String,
    pub skip_blanks: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

impl Default for CombineOperation {
    fn default() -> Self {
        Self {
            target_column: String::new(),
            source_columns: Vec::new(),
            delimiter: "|".into(),
            skip_blanks: true,
            prefix: None,
            suffix: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOperation {
    pub target_column: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_column: Option<String>,
    /// Pipeline JSON. TOML authors may write it as an inline table instead.
    #[serde(deserialize_with = "json_text")]
    pub configuration: String,
}

impl PipelineOperation {
    pub fn source(&self) -> &str {
        non_blank(&self.source_column).unwrap_or(&self.target_column)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundOperation {
    pub target_column: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_column: Option<String>,
    pub scale: i32,
    pub rounding_mode: RoundingMode,
}

impl Default for RoundOperation {
    fn default() -> Self {
        Self {
            target_column: String::new(),
            source_column: None,
            scale: 2,
            rounding_mode: RoundingMode::HalfUp,
        }
    }
}

impl RoundOperation {
    pub fn source(&self) -> &str {
        non_blank(&self.source_column).unwrap_or(&self.target_column)
    }
}

// ---------------------------------------------------------------------------
// Rounding
// ---------------------------------------------------------------------------

/// Decimal rounding modes, named the way plan authors know them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    #[default]
    HalfUp,
    HalfDown,
    HalfEven,
    Up,
    Down,
    Ceiling,
    Floor,
}

impl RoundingMode {
    pub fn strategy(self) -> RoundingStrategy {
        match self {
            RoundingMode::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            RoundingMode::HalfDown => RoundingStrategy::MidpointTowardZero,
            RoundingMode::HalfEven => RoundingStrategy::MidpointNearestEven,
            RoundingMode::Up => RoundingStrategy::AwayFromZero,
            RoundingMode::Down => RoundingStrategy::ToZero,
            RoundingMode::Ceiling => RoundingStrategy::ToPositiveInfinity,
            RoundingMode::Floor => RoundingStrategy::ToNegativeInfinity,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn non_blank(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|s| !s.trim().is_empty())
}

pub(crate) fn json_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}
