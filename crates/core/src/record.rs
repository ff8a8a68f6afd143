//! A source row after projection onto the definition's canonical fields.

use serde::{Deserialize, Serialize};

use crate::row::Row;
use crate::value::Value;

/// Canonical key plus canonical field values; the unit matching works on.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub canonical_key: String,
    pub fields: Row,
}

impl CanonicalRecord {
    pub fn new(canonical_key: impl Into<String>, fields: Row) -> Self {
        Self { canonical_key: canonical_key.into(), fields }
    }

    /// Field value, null when the field was never projected.
    pub fn value(&self, field: &str) -> &Value {
        self.fields.value(field)
    }
}
