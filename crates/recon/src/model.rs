use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use unirecon_core::{CanonicalField, CanonicalRecord, ReconciliationDefinition, ReconciliationSource, Row};

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

pub type BatchId = i64;

/// Identity of one ingested batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchInfo {
    pub id: BatchId,
    pub label: String,
    pub ingested_at: DateTime<Utc>,
}

/// A batch of canonical records as read back from a store.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceBatch {
    pub info: BatchInfo,
    pub records: Vec<CanonicalRecord>,
}

// ---------------------------------------------------------------------------
// Source datasets
// ---------------------------------------------------------------------------

/// Canonical records of one source, keyed by canonical key in first-seen order.
#[derive(Debug, Clone)]
pub struct SourceDataset {
    pub source: ReconciliationSource,
    pub batch: Option<BatchInfo>,
    records: Vec<(String, Row)>,
    index: HashMap<String, usize>,
}

impl SourceDataset {
    /// A later record with an already-seen key replaces the earlier one in place.
    pub fn new(source: ReconciliationSource, batch: Option<BatchInfo>, records: Vec<CanonicalRecord>) -> Self {
        let mut dataset = Self {
            source,
            batch,
            records: Vec::with_capacity(records.len()),
            index: HashMap::with_capacity(records.len()),
        };
        for record in records {
            match dataset.index.get(&record.canonical_key) {
                Some(&pos) => {
                    log::debug!(
                        "source {}: duplicate canonical key '{}', keeping the later record",
                        dataset.source.code,
                        record.canonical_key
                    );
                    dataset.records[pos].1 = record.fields;
                }
                None => {
                    dataset.index.insert(record.canonical_key.clone(), dataset.records.len());
                    dataset.records.push((record.canonical_key, record.fields));
                }
            }
        }
        dataset
    }

    pub fn code(&self) -> &str {
        &self.source.code
    }

    pub fn get(&self, key: &str) -> Option<&Row> {
        self.index.get(key).map(|&pos| &self.records[pos].1)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Row)> {
        self.records.iter().map(|(k, r)| (k.as_str(), r))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything one matching pass needs. Built fresh per run and never mutated.
#[derive(Debug, Clone)]
pub struct DynamicReconciliationContext {
    pub(crate) definition: ReconciliationDefinition,
    pub(crate) key_fields: Vec<CanonicalField>,
    pub(crate) compare_fields: Vec<CanonicalField>,
    pub(crate) classifier_fields: Vec<CanonicalField>,
    pub(crate) anchor: SourceDataset,
    pub(crate) others: Vec<SourceDataset>,
}

impl DynamicReconciliationContext {
    pub fn definition(&self) -> &ReconciliationDefinition {
        &self.definition
    }

    pub fn key_fields(&self) -> &[CanonicalField] {
        &self.key_fields
    }

    pub fn compare_fields(&self) -> &[CanonicalField] {
        &self.compare_fields
    }

    /// Product / sub-product / entity / tagged fields, in display order.
    pub fn classifier_fields(&self) -> &[CanonicalField] {
        &self.classifier_fields
    }

    pub fn anchor(&self) -> &SourceDataset {
        &self.anchor
    }

    pub fn other_sources(&self) -> &[SourceDataset] {
        &self.others
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakType {
    Mismatch,
    /// Present in a comparison source, absent from the anchor.
    AnchorMissing,
    /// Present in the anchor, absent from one or more comparison sources.
    SourceMissing,
}

impl std::fmt::Display for BreakType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mismatch => write!(f, "mismatch"),
            Self::AnchorMissing => write!(f, "anchor_missing"),
            Self::SourceMissing => write!(f, "source_missing"),
        }
    }
}

/// One source's view of a canonical key. Empty when the source lacks the key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSnapshot {
    pub source: String,
    pub record: Row,
}

impl SourceSnapshot {
    pub fn new(source: impl Into<String>, record: Row) -> Self {
        Self { source: source.into(), record }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakCandidate {
    pub break_type: BreakType,
    pub canonical_key: String,
    pub sources: Vec<SourceSnapshot>,
    pub classifications: BTreeMap<String, String>,
    pub missing_sources: Vec<String>,
    /// COMPARE fields that differed from the anchor in at least one source.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mismatched_fields: Vec<String>,
}

impl BreakCandidate {
    pub fn snapshot(&self, source: &str) -> Option<&Row> {
        self.sources.iter().find(|s| s.source == source).map(|s| &s.record)
    }

    pub fn classification(&self, key: &str) -> Option<&str> {
        self.classifications.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchingResult {
    pub matched_count: usize,
    pub mismatched_count: usize,
    pub missing_count: usize,
    pub breaks: Vec<BreakCandidate>,
}

impl MatchingResult {
    pub fn has_breaks(&self) -> bool {
        !self.breaks.is_empty()
    }

    pub fn breaks_of(&self, break_type: BreakType) -> impl Iterator<Item = &BreakCandidate> {
        self.breaks.iter().filter(move |b| b.break_type == break_type)
    }
}
