//! Projection of normalized rows onto the field catalog.
//!
//! Each catalog field is resolved from its mapped column (or a default),
//! passed through its transformation chain, normalized by data type, and the
//! KEY fields are joined into the record's canonical key.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use unirecon_core::{CanonicalField, CanonicalRecord, DataType, FieldRole, Row, Value};

use crate::error::TransformationError;
use crate::evaluator::{Evaluators, TransformationKind};
use crate::pipeline::date_pattern;
use crate::plan::json_text;

const KEY_SEPARATOR: &str = "|";

// ---------------------------------------------------------------------------
// Mapping configuration
// ---------------------------------------------------------------------------

/// Binds a canonical field to a source column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub field: String,
    /// Source column; the field name when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// `dd/MM/yyyy` style or chrono `%d/%m/%Y` pattern of incoming date text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_date_format: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformations: Vec<FieldTransformation>,
}

impl FieldMapping {
    pub fn new(field: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            column: Some(column.into()),
            default_value: None,
            source_date_format: None,
            transformations: Vec::new(),
        }
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_date_format(mut self, format: impl Into<String>) -> Self {
        self.source_date_format = Some(format.into());
        self
    }

    pub fn with_transformation(mut self, transformation: FieldTransformation) -> Self {
        self.transformations.push(transformation);
        self
    }

    pub fn column(&self) -> &str {
        self.column.as_deref().filter(|c| !c.trim().is_empty()).unwrap_or(&self.field)
    }

    /// Active transformations in display order; unordered steps run last.
    pub fn active_transformations(&self) -> Vec<&FieldTransformation> {
        let mut steps: Vec<&FieldTransformation> = self.transformations.iter().filter(|t| t.active).collect();
        steps.sort_by_key(|t| (t.display_order.is_none(), t.display_order));
        steps
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldTransformation {
    pub kind: TransformationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, deserialize_with = "json_text", skip_serializing_if = "String::is_empty")]
    pub configuration: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_order: Option<i32>,
}

fn default_active() -> bool {
    true
}

impl FieldTransformation {
    pub fn expression(kind: TransformationKind, expression: impl Into<String>) -> Self {
        Self {
            kind,
            expression: Some(expression.into()),
            configuration: String::new(),
            active: true,
            display_order: None,
        }
    }

    pub fn configured(kind: TransformationKind, configuration: impl Into<String>) -> Self {
        Self {
            kind,
            expression: None,
            configuration: configuration.into(),
            active: true,
            display_order: None,
        }
    }

    pub fn ordered(mut self, order: i32) -> Self {
        self.display_order = Some(order);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// What the evaluator receives: the expression for script and formula
    /// steps, the JSON configuration otherwise.
    pub fn config(&self) -> &str {
        if self.kind.uses_expression() {
            self.expression.as_deref().unwrap_or("")
        } else {
            &self.configuration
        }
    }
}

// ---------------------------------------------------------------------------
// Projector
// ---------------------------------------------------------------------------

pub struct CanonicalProjector<'a> {
    fields: &'a [CanonicalField],
    mappings: HashMap<&'a str, &'a FieldMapping>,
    evaluators: &'a Evaluators,
}

impl<'a> CanonicalProjector<'a> {
    pub fn new(fields: &'a [CanonicalField], mappings: &'a [FieldMapping], evaluators: &'a Evaluators) -> Self {
        let mappings = mappings.iter().map(|m| (m.field.as_str(), m)).collect();
        Self { fields, mappings, evaluators }
    }

    /// Every mapping names a catalog field and every active step validates.
    pub fn validate(&self) -> Result<(), TransformationError> {
        for (name, mapping) in &self.mappings {
            if !self.fields.iter().any(|f| f.name == *name) {
                return Err(TransformationError::validation(format!(
                    "mapping references unknown canonical field '{name}'"
                )));
            }
            for step in mapping.active_transformations() {
                self.evaluators
                    .validate(step.kind, step.config())
                    .map_err(|e| e.context(&format!("field '{name}' {} transformation", step.kind)))?;
            }
        }
        Ok(())
    }

    pub fn project(&self, row: &Row) -> Result<CanonicalRecord, TransformationError> {
        let mut fields = Row::with_capacity(self.fields.len());
        for field in self.fields {
            let value = self.resolve(field, row)?;
            fields.insert(field.name.as_str(), value);
        }
        let canonical_key = self
            .fields
            .iter()
            .filter(|f| f.role == FieldRole::Key)
            .map(|f| fields.value(&f.name).to_string())
            .collect::<Vec<_>>()
            .join(KEY_SEPARATOR);
        Ok(CanonicalRecord { canonical_key, fields })
    }

    pub fn project_all(&self, rows: &[Row]) -> Result<Vec<CanonicalRecord>, TransformationError> {
        let records = rows.iter().map(|row| self.project(row)).collect::<Result<Vec<_>, _>>()?;
        log::debug!("projected {} rows onto {} canonical fields", records.len(), self.fields.len());
        Ok(records)
    }

    fn resolve(&self, field: &CanonicalField, row: &Row) -> Result<Value, TransformationError> {
        let Some(mapping) = self.mappings.get(field.name.as_str()) else {
            return convert(Value::Null, field);
        };

        let mut value = row.value(mapping.column()).clone();
        if value.is_blank() {
            if let Some(default) = &mapping.default_value {
                value = Value::text(default.as_str());
            }
        }

        for step in mapping.active_transformations() {
            value = self
                .evaluators
                .evaluate(step.kind, &value, row, step.config())
                .map_err(|e| e.context(&format!("Transformation failed for field {}", field.name)))?;
        }

        if let Some(format) = mapping.source_date_format.as_deref().filter(|f| !f.trim().is_empty()) {
            value = normalize_date(value, format, field)?;
        }
        convert(value, field)
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

fn normalize_date(value: Value, format: &str, field: &CanonicalField) -> Result<Value, TransformationError> {
    let Value::Text(text) = &value else {
        return Ok(value);
    };
    if text.trim().is_empty() {
        return Ok(value);
    }
    let pattern = date_pattern(format);
    let parsed = match field.data_type {
        DataType::Date => NaiveDate::parse_from_str(text.trim(), &pattern).map(Value::Date),
        DataType::DateTime => NaiveDateTime::parse_from_str(text.trim(), &pattern).map(Value::DateTime),
        _ => return Ok(value),
    };
    parsed.map_err(|e| {
        TransformationError::with_source(
            format!(
                "Unable to normalise date value '{}' for field {} using format {}",
                text, field.name, format
            ),
            e,
        )
    })
}

/// Coerce to the field's data type. Blank text becomes null.
fn convert(value: Value, field: &CanonicalField) -> Result<Value, TransformationError> {
    if value.is_blank() {
        if field.required {
            return Err(TransformationError::evaluation(format!(
                "Missing required value for canonical field {}",
                field.name
            )));
        }
        return Ok(Value::Null);
    }
    let value = match value {
        Value::Text(s) => Value::Text(s.trim().to_string()),
        other => other,
    };
    let converted = match field.data_type {
        DataType::String => Ok(Value::Text(value.to_string())),
        DataType::Decimal | DataType::Integer => value.to_decimal().map(Value::Decimal),
        DataType::Date => value.to_date().map(Value::Date),
        DataType::DateTime => value.to_datetime().map(Value::DateTime),
        DataType::Boolean => value.to_bool().map(Value::Bool),
    };
    converted.map_err(|e| TransformationError::with_source(format!("field {}: {}", field.name, e), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn catalog() -> Vec<CanonicalField> {
        vec![
            CanonicalField::new("tradeId", FieldRole::Key).required(),
            CanonicalField::new("book", FieldRole::Key),
            CanonicalField::new("amount", FieldRole::Compare).with_data_type(DataType::Decimal),
            CanonicalField::new("tradeDate", FieldRole::Compare).with_data_type(DataType::Date),
            CanonicalField::new("active", FieldRole::Attribute).with_data_type(DataType::Boolean),
            CanonicalField::new("product", FieldRole::Product),
        ]
    }

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs.iter().copied().collect()
    }

    #[test]
    fn projects_and_builds_canonical_key() {
        let fields = catalog();
        let mappings = vec![
            FieldMapping::new("tradeId", "trade_id"),
            FieldMapping::new("book", "book"),
            FieldMapping::new("amount", "amt"),
            FieldMapping::new("tradeDate", "trade_date").with_date_format("dd/MM/yyyy"),
            FieldMapping::new("active", "live").with_default("no"),
        ];
        let evaluators = Evaluators::new();
        let projector = CanonicalProjector::new(&fields, &mappings, &evaluators);
        projector.validate().unwrap();

        let record = projector
            .project(&row(&[("trade_id", " T1 "), ("book", "FX"), ("amt", "10.50"), ("trade_date", "03/02/2024"), ("live", "")]))
            .unwrap();
        assert_eq!(record.canonical_key, "T1|FX");
        assert_eq!(record.value("amount"), &Value::Decimal(Decimal::from_str("10.5").unwrap()));
        assert_eq!(record.value("tradeDate"), &Value::Date(NaiveDate::from_ymd_opt(2024, 2, 3).unwrap()));
        assert_eq!(record.value("active"), &Value::Bool(false));
        // unmapped fields are still present
        assert!(record.fields.contains("product"));
        assert!(record.value("product").is_null());
    }

    #[test]
    fn null_key_component_renders_empty() {
        let fields = catalog();
        let mappings = vec![FieldMapping::new("tradeId", "id")];
        let evaluators = Evaluators::new();
        let projector = CanonicalProjector::new(&fields, &mappings, &evaluators);
        let record = projector.project(&row(&[("id", "T9")])).unwrap();
        assert_eq!(record.canonical_key, "T9|");
    }

    #[test]
    fn required_field_must_resolve() {
        let fields = catalog();
        let mappings = vec![FieldMapping::new("tradeId", "id")];
        let evaluators = Evaluators::new();
        let projector = CanonicalProjector::new(&fields, &mappings, &evaluators);
        let err = projector.project(&row(&[("id", "  ")])).unwrap_err();
        assert_eq!(err.to_string(), "Missing required value for canonical field tradeId");
    }

    #[test]
    fn transformations_run_in_display_order_and_skip_inactive() {
        let fields = catalog();
        let mappings = vec![FieldMapping::new("tradeId", "id")
            .with_transformation(FieldTransformation::expression(TransformationKind::Formula, "=VALUE & \"-B\"").ordered(2))
            .with_transformation(FieldTransformation::expression(TransformationKind::Formula, "=UPPER(VALUE)").ordered(1))
            .with_transformation(FieldTransformation::expression(TransformationKind::Formula, "=\"X\"").inactive())
            .with_transformation(FieldTransformation::configured(
                TransformationKind::Pipeline,
                r#"{"steps":[{"function":"PREFIX","args":["{{book}}"]}]}"#,
            ))];
        let evaluators = Evaluators::new();
        let projector = CanonicalProjector::new(&fields, &mappings, &evaluators);
        projector.validate().unwrap();
        let record = projector.project(&row(&[("id", "t1"), ("book", "FX")])).unwrap();
        assert_eq!(record.value("tradeId"), &Value::text("FXT1-B"));
    }

    #[test]
    fn failures_name_the_field() {
        let fields = catalog();
        let mappings = vec![
            FieldMapping::new("tradeId", "id"),
            FieldMapping::new("amount", "amt"),
        ];
        let evaluators = Evaluators::new();
        let projector = CanonicalProjector::new(&fields, &mappings, &evaluators);
        let err = projector.project(&row(&[("id", "T1"), ("amt", "ten")])).unwrap_err();
        assert_eq!(err.to_string(), "field amount: cannot convert 'ten' to a decimal");

        let mappings = vec![FieldMapping::new("tradeId", "id")
            .with_transformation(FieldTransformation::expression(TransformationKind::Script, "error('boom')"))];
        let projector = CanonicalProjector::new(&fields, &mappings, &evaluators);
        let err = projector.project(&row(&[("id", "T1")])).unwrap_err();
        assert!(err.to_string().starts_with("Transformation failed for field tradeId: "), "{err}");

        let mappings = vec![
            FieldMapping::new("tradeId", "id"),
            FieldMapping::new("tradeDate", "d").with_date_format("yyyy/MM/dd"),
        ];
        let projector = CanonicalProjector::new(&fields, &mappings, &evaluators);
        let err = projector.project(&row(&[("id", "T1"), ("d", "2024-01-01")])).unwrap_err();
        assert!(err.to_string().contains("for field tradeDate using format yyyy/MM/dd"), "{err}");
    }

    #[test]
    fn validation_rejects_unknown_fields_and_bad_steps() {
        let fields = catalog();
        let evaluators = Evaluators::new();

        let mappings = vec![FieldMapping::new("nope", "x")];
        let err = CanonicalProjector::new(&fields, &mappings, &evaluators).validate().unwrap_err();
        assert!(err.to_string().contains("'nope'"));

        let mappings = vec![FieldMapping::new("book", "b")
            .with_transformation(FieldTransformation::configured(TransformationKind::Pipeline, r#"{"steps":[{"function":""}]}"#))];
        let err = CanonicalProjector::new(&fields, &mappings, &evaluators).validate().unwrap_err();
        assert_eq!(err.to_string(), "field 'book' pipeline transformation: Function name cannot be empty");
    }

    #[test]
    fn mapping_deserializes_with_inline_configuration() {
        let mapping: FieldMapping = toml::from_str(
            r#"
field = "ccy"
[[transformations]]
kind = "pipeline"
configuration = { steps = [{ function = "TRIM" }] }
"#,
        )
        .unwrap();
        assert_eq!(mapping.column(), "ccy");
        assert!(mapping.transformations[0].active);
        assert!(mapping.transformations[0].config().contains("TRIM"));
    }
}
