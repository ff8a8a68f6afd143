use std::collections::HashSet;

use serde::Deserialize;
use unirecon_core::{CanonicalField, ComparisonLogic, FieldRole, ReconciliationDefinition, ReconciliationSource};
use unirecon_transform::{FieldMapping, SourceTransformationPlan};

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// A reconciliation definition as authored in a `*.recon.toml` file.
#[derive(Debug, Clone, Deserialize)]
pub struct DefinitionConfig {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    pub fields: Vec<CanonicalField>,
    pub sources: Vec<SourceConfig>,
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub code: String,
    #[serde(default)]
    pub anchor: bool,
    /// CSV input, relative to the config file.
    pub file: String,
    #[serde(default)]
    pub plan: Option<SourceTransformationPlan>,
    #[serde(default)]
    pub mappings: Vec<FieldMapping>,
}

impl SourceConfig {
    /// Configured mappings, or one same-named column per field when none are given.
    pub fn effective_mappings(&self, fields: &[CanonicalField]) -> Vec<FieldMapping> {
        if self.mappings.is_empty() {
            fields.iter().map(|f| FieldMapping::new(&f.name, &f.name)).collect()
        } else {
            self.mappings.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + validate
// ---------------------------------------------------------------------------

impl DefinitionConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: Self = toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.code.trim().is_empty() {
            return Err(ReconError::ConfigValidation("definition code must not be blank".into()));
        }
        if self.fields.is_empty() {
            return Err(ReconError::ConfigValidation("at least one field is required".into()));
        }
        if !self.fields.iter().any(|f| f.role == FieldRole::Key) {
            return Err(ReconError::ConfigValidation("at least one key field is required".into()));
        }

        let mut names = HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(ReconError::ConfigValidation("field name must not be blank".into()));
            }
            if !names.insert(field.name.as_str()) {
                return Err(ReconError::ConfigValidation(format!("duplicate field '{}'", field.name)));
            }
            if let Some(pct) = field.threshold_percentage {
                if pct.is_sign_negative() {
                    return Err(ReconError::ConfigValidation(format!(
                        "field '{}': threshold_percentage must not be negative",
                        field.name
                    )));
                }
                if field.comparison != ComparisonLogic::NumericThreshold {
                    log::warn!(
                        "field '{}': threshold_percentage is ignored unless comparison = \"numeric_threshold\"",
                        field.name
                    );
                }
            }
        }

        if self.sources.is_empty() {
            return Err(ReconError::ConfigValidation("at least one source is required".into()));
        }
        let mut codes = HashSet::new();
        for source in &self.sources {
            if source.code.trim().is_empty() {
                return Err(ReconError::ConfigValidation("source code must not be blank".into()));
            }
            if !codes.insert(source.code.as_str()) {
                return Err(ReconError::ConfigValidation(format!("duplicate source '{}'", source.code)));
            }
            for mapping in &source.mappings {
                if !names.contains(mapping.field.as_str()) {
                    return Err(ReconError::ConfigValidation(format!(
                        "source '{}': mapping references unknown field '{}'",
                        source.code, mapping.field
                    )));
                }
            }
        }

        match self.sources.iter().filter(|s| s.anchor).count() {
            1 => Ok(()),
            0 => Err(ReconError::ConfigValidation("exactly one source must be the anchor, found none".into())),
            n => Err(ReconError::ConfigValidation(format!("exactly one source must be the anchor, found {n}"))),
        }
    }

    pub fn definition(&self) -> ReconciliationDefinition {
        ReconciliationDefinition {
            code: self.code.clone(),
            name: self.name.clone(),
            fields: self.fields.clone(),
            sources: self.sources.iter().map(|s| ReconciliationSource::new(&s.code, s.anchor)).collect(),
        }
    }

    pub fn source(&self, code: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.code == code)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
