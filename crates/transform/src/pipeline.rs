//! Declarative function pipelines: an ordered list of named single-value steps.
//!
//! ```json
//! {"steps": [{"function": "TRIM"}, {"function": "PREFIX", "args": ["{{desk}}-"]}]}
//! ```
//!
//! An argument written as `{{column}}` resolves to that column of the row.

use std::fmt::Write;

use chrono::NaiveDate;
use serde::Deserialize;
use unirecon_core::{Row, Value};

use crate::error::TransformationError;
use crate::evaluator::{TransformationEvaluator, TransformationKind};

const FUNCTIONS: &[&str] = &[
    "TRIM",
    "TO_UPPERCASE",
    "TO_LOWERCASE",
    "REPLACE",
    "SUBSTRING",
    "DEFAULT_IF_BLANK",
    "PREFIX",
    "SUFFIX",
    "FORMAT_DATE",
];

#[derive(Debug, Deserialize)]
struct PipelineDefinition {
    #[serde(default)]
    steps: Vec<PipelineStep>,
}

#[derive(Debug, Deserialize)]
struct PipelineStep {
    #[serde(default)]
    function: String,
    #[serde(default)]
    args: Vec<serde_json::Value>,
}

impl PipelineStep {
    fn name(&self) -> String {
        self.function.trim().to_uppercase()
    }

    fn arg(&self, i: usize) -> Option<String> {
        self.args.get(i).and_then(|a| match a {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
    }
}

fn parse_definition(config: &str) -> Result<PipelineDefinition, TransformationError> {
    let definition: PipelineDefinition = serde_json::from_str(config)
        .map_err(|e| TransformationError::with_source("Invalid function pipeline configuration", e))?;
    for step in &definition.steps {
        let name = step.name();
        if name.is_empty() {
            return Err(TransformationError::validation("Function name cannot be empty"));
        }
        if !FUNCTIONS.contains(&name.as_str()) {
            return Err(TransformationError::validation(format!("Unsupported function: {}", step.function)));
        }
    }
    Ok(definition)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineEvaluator;

impl TransformationEvaluator for PipelineEvaluator {
    fn kind(&self) -> TransformationKind {
        TransformationKind::Pipeline
    }

    fn validate(&self, config: &str) -> Result<(), TransformationError> {
        if config.trim().is_empty() {
            return Err(TransformationError::validation("Pipeline configuration JSON is required"));
        }
        parse_definition(config).map(|_| ()).map_err(|e| match e {
            TransformationError::Evaluation { message, .. } => TransformationError::Validation(message),
            other => other,
        })
    }

    fn evaluate(&self, value: &Value, row: &Row, config: &str) -> Result<Value, TransformationError> {
        if config.trim().is_empty() {
            return Ok(value.clone());
        }
        let definition = parse_definition(config)?;
        let mut current = value.clone();
        for step in &definition.steps {
            current = apply_step(step, current, row)?;
        }
        Ok(current)
    }
}

fn apply_step(step: &PipelineStep, value: Value, row: &Row) -> Result<Value, TransformationError> {
    let resolved = |i: usize| step.arg(i).and_then(|raw| resolve_arg(&raw, row));

    match step.name().as_str() {
        "TRIM" => Ok(map_text(value, |s| s.trim().to_string())),
        "TO_UPPERCASE" => Ok(map_text(value, |s| s.to_uppercase())),
        "TO_LOWERCASE" => Ok(map_text(value, |s| s.to_lowercase())),
        "REPLACE" => {
            if value.is_null() {
                return Ok(value);
            }
            if step.args.len() < 2 {
                return Err(TransformationError::evaluation("REPLACE requires two arguments"));
            }
            let target = resolved(0).unwrap_or_default();
            let replacement = resolved(1).unwrap_or_default();
            if target.is_empty() {
                return Ok(Value::Text(value.to_string()));
            }
            Ok(Value::Text(value.to_string().replace(&target, &replacement)))
        }
        "SUBSTRING" => {
            if value.is_null() {
                return Ok(value);
            }
            let text: Vec<char> = value.to_string().chars().collect();
            let start = step
                .arg(0)
                .ok_or_else(|| TransformationError::evaluation("SUBSTRING requires at least a start index"))?;
            let start = parse_index(&start)?;
            let end = match step.arg(1) {
                Some(end) => parse_index(&end)?,
                None => text.len() as i64,
            };
            let from = start.clamp(0, text.len() as i64) as usize;
            let to = end.clamp(0, text.len() as i64) as usize;
            if from >= to {
                return Ok(Value::Text(String::new()));
            }
            Ok(Value::Text(text[from..to].iter().collect()))
        }
        "DEFAULT_IF_BLANK" => {
            if value.is_blank() {
                return Ok(resolved(0).map(Value::Text).unwrap_or(Value::Null));
            }
            Ok(value)
        }
        "PREFIX" => {
            let prefix = resolved(0).unwrap_or_default();
            Ok(Value::Text(format!("{}{}", prefix, value)))
        }
        "SUFFIX" => {
            let suffix = resolved(0).unwrap_or_default();
            Ok(Value::Text(format!("{}{}", value, suffix)))
        }
        "FORMAT_DATE" => {
            if value.is_null() {
                return Ok(value);
            }
            let (Some(source), Some(target)) = (step.arg(0), step.arg(1)) else {
                return Err(TransformationError::evaluation(
                    "FORMAT_DATE requires source and target patterns",
                ));
            };
            let text = value.to_string();
            let parsed = NaiveDate::parse_from_str(text.trim(), &date_pattern(&source))
                .map_err(|e| TransformationError::with_source(format!("Unable to format date: {}", text), e))?;
            format_date(parsed, &date_pattern(&target)).map(Value::Text)
        }
        _ => Err(TransformationError::evaluation(format!("Unsupported function: {}", step.function))),
    }
}

/// Render a date through a chrono pattern without panicking on bad specifiers.
pub(crate) fn format_date(date: NaiveDate, pattern: &str) -> Result<String, TransformationError> {
    let mut out = String::new();
    let at_midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| TransformationError::evaluation(format!("Invalid date: {}", date)))?;
    write!(out, "{}", at_midnight.format(pattern))
        .map_err(|_| TransformationError::evaluation(format!("Invalid date pattern: {}", pattern)))?;
    Ok(out)
}

fn map_text(value: Value, f: impl FnOnce(&str) -> String) -> Value {
    match value {
        Value::Null => Value::Null,
        other => Value::Text(f(&other.to_string())),
    }
}

fn parse_index(raw: &str) -> Result<i64, TransformationError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|e| TransformationError::with_source("SUBSTRING arguments must be numeric", e))
}

/// `{{column}}` reads the row (absent or null column gives `None`); anything else is literal.
fn resolve_arg(raw: &str, row: &Row) -> Option<String> {
    match raw.strip_prefix("{{").and_then(|r| r.strip_suffix("}}")) {
        Some(column) => row.get(column.trim()).and_then(Value::to_text),
        None => Some(raw.to_string()),
    }
}

/// Translate a `yyyy-MM-dd` style pattern into a chrono format string.
///
/// Strings already containing `%` are taken to be chrono formats. Letters
/// outside the recognised set pass through literally; text between single
/// quotes is literal.
pub fn date_pattern(pattern: &str) -> String {
    if pattern.contains('%') {
        return pattern.to_string();
    }
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            i += 1;
            while i < chars.len() && chars[i] != '\'' {
                out.push(chars[i]);
                i += 1;
            }
            i += 1;
            continue;
        }
        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }
        let spec = match (c, run) {
            ('y', 2) => "%y",
            ('y', _) => "%Y",
            ('M', 1) => "%-m",
            ('M', 2) => "%m",
            ('M', 3) => "%b",
            ('M', _) => "%B",
            ('d', 1) => "%-d",
            ('d', _) => "%d",
            ('H', 1) => "%-H",
            ('H', _) => "%H",
            ('m', 1) => "%-M",
            ('m', _) => "%M",
            ('s', 1) => "%-S",
            ('s', _) => "%S",
            ('E', n) if n >= 4 => "%A",
            ('E', _) => "%a",
            _ => {
                for _ in 0..run {
                    out.push(c);
                }
                i += run;
                continue;
            }
        };
        out.push_str(spec);
        i += run;
    }
    out
}
