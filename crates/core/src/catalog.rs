//! Field catalog: the administrator-defined schema of a reconciliation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    Key,
    Compare,
    Display,
    Product,
    SubProduct,
    Entity,
    Classifier,
    Attribute,
}

impl FieldRole {
    /// Classification label implied by the role when no explicit tag is set.
    pub fn classification_key(self) -> Option<&'static str> {
        match self {
            FieldRole::Product => Some("product"),
            FieldRole::SubProduct => Some("subProduct"),
            FieldRole::Entity => Some("entity"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[default]
    String,
    Decimal,
    Integer,
    Date,
    #[serde(rename = "datetime")]
    DateTime,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonLogic {
    #[default]
    ExactMatch,
    CaseInsensitive,
    NumericThreshold,
    DateOnly,
}

// ---------------------------------------------------------------------------
// Fields and sources
// ---------------------------------------------------------------------------

/// One logical attribute of a reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalField {
    pub name: String,
    pub role: FieldRole,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub comparison: ComparisonLogic,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_percentage: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_order: Option<i32>,
    #[serde(default)]
    pub required: bool,
}

impl CanonicalField {
    pub fn new(name: impl Into<String>, role: FieldRole) -> Self {
        Self {
            name: name.into(),
            role,
            data_type: DataType::String,
            comparison: ComparisonLogic::ExactMatch,
            threshold_percentage: None,
            classifier_tag: None,
            display_order: None,
            required: false,
        }
    }

    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn with_comparison(mut self, comparison: ComparisonLogic) -> Self {
        self.comparison = comparison;
        self
    }

    pub fn with_threshold(mut self, percentage: Decimal) -> Self {
        self.threshold_percentage = Some(percentage);
        self
    }

    pub fn with_classifier_tag(mut self, tag: impl Into<String>) -> Self {
        self.classifier_tag = Some(tag.into());
        self
    }

    pub fn with_display_order(mut self, order: i32) -> Self {
        self.display_order = Some(order);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// A field categorizes breaks when it carries a tag or a
    /// product / sub-product / entity role.
    pub fn is_classifier(&self) -> bool {
        self.classifier_tag.as_deref().is_some_and(|t| !t.trim().is_empty())
            || self.role.classification_key().is_some()
    }

    /// Label under which this field's value is reported in break classifications.
    pub fn classification_key(&self) -> Option<&str> {
        match self.classifier_tag.as_deref() {
            Some(tag) if !tag.trim().is_empty() => Some(tag),
            _ => self.role.classification_key(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationSource {
    pub code: String,
    #[serde(default)]
    pub anchor: bool,
}

impl ReconciliationSource {
    pub fn new(code: impl Into<String>, anchor: bool) -> Self {
        Self { code: code.into(), anchor }
    }
}

/// A reconciliation definition: the field catalog plus its configured feeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationDefinition {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub fields: Vec<CanonicalField>,
    pub sources: Vec<ReconciliationSource>,
}

impl ReconciliationDefinition {
    pub fn fields_with_role(&self, role: FieldRole) -> impl Iterator<Item = &CanonicalField> {
        self.fields.iter().filter(move |f| f.role == role)
    }

    pub fn anchor(&self) -> Option<&ReconciliationSource> {
        self.sources.iter().find(|s| s.anchor)
    }

    pub fn field(&self, name: &str) -> Option<&CanonicalField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_implies_classification_key() {
        let product = CanonicalField::new("desk", FieldRole::Product);
        assert!(product.is_classifier());
        assert_eq!(product.classification_key(), Some("product"));

        let sub = CanonicalField::new("book", FieldRole::SubProduct);
        assert_eq!(sub.classification_key(), Some("subProduct"));

        let amount = CanonicalField::new("amount", FieldRole::Compare);
        assert!(!amount.is_classifier());
        assert_eq!(amount.classification_key(), None);
    }

    #[test]
    fn explicit_tag_overrides_role() {
        let field = CanonicalField::new("le", FieldRole::Entity).with_classifier_tag("legalEntity");
        assert_eq!(field.classification_key(), Some("legalEntity"));

        let tagged_attr =
            CanonicalField::new("region", FieldRole::Attribute).with_classifier_tag("region");
        assert!(tagged_attr.is_classifier());
    }

    #[test]
    fn blank_tag_is_ignored() {
        let field = CanonicalField::new("x", FieldRole::Attribute).with_classifier_tag("  ");
        assert!(!field.is_classifier());
        assert_eq!(field.classification_key(), None);

        let entity = CanonicalField::new("le", FieldRole::Entity).with_classifier_tag("");
        assert!(entity.is_classifier());
        assert_eq!(entity.classification_key(), Some("entity"));
    }

    #[test]
    fn field_deserializes_with_defaults() {
        let field: CanonicalField = toml::from_str(
            r#"
name = "amount"
role = "compare"
data_type = "decimal"
comparison = "numeric_threshold"
threshold_percentage = "2.5"
"#,
        )
        .unwrap();
        assert_eq!(field.data_type, DataType::Decimal);
        assert_eq!(field.comparison, ComparisonLogic::NumericThreshold);
        assert_eq!(field.threshold_percentage, Some(Decimal::new(25, 1)));
        assert!(!field.required);

        let plain: CanonicalField = toml::from_str("name = \"id\"\nrole = \"key\"").unwrap();
        assert_eq!(plain.data_type, DataType::String);
        assert_eq!(plain.comparison, ComparisonLogic::ExactMatch);
    }

    #[test]
    fn definition_lookups() {
        let def = ReconciliationDefinition {
            code: "D".into(),
            name: None,
            fields: vec![
                CanonicalField::new("id", FieldRole::Key),
                CanonicalField::new("amount", FieldRole::Compare),
                CanonicalField::new("ccy", FieldRole::Compare),
            ],
            sources: vec![
                ReconciliationSource::new("A", false),
                ReconciliationSource::new("B", true),
            ],
        };
        assert_eq!(def.anchor().map(|s| s.code.as_str()), Some("B"));
        assert_eq!(def.fields_with_role(FieldRole::Compare).count(), 2);
        assert!(def.field("ccy").is_some());
        assert!(def.field("nope").is_none());
    }
}
