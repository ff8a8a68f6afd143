use std::collections::HashMap;

use serde::Serialize;

use crate::model::{BreakCandidate, MatchingResult};

pub const UNSPECIFIED: &str = "Unspecified";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountEntry {
    pub label: String,
    pub count: usize,
}

/// Derived counts over one matching result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub matched: usize,
    pub mismatched: usize,
    pub missing: usize,
    pub total_breaks: usize,
    pub by_type: Vec<CountEntry>,
    pub by_product: Vec<CountEntry>,
    pub by_entity: Vec<CountEntry>,
}

/// Compute summary statistics from a matching result.
pub fn summarize(result: &MatchingResult) -> RunSummary {
    let by = |label: fn(&BreakCandidate) -> String| {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for b in &result.breaks {
            *counts.entry(label(b)).or_insert(0) += 1;
        }
        ranked(counts)
    };

    RunSummary {
        matched: result.matched_count,
        mismatched: result.mismatched_count,
        missing: result.missing_count,
        total_breaks: result.breaks.len(),
        by_type: by(|b| b.break_type.to_string()),
        by_product: by(|b| classification_or_unspecified(b, "product")),
        by_entity: by(|b| classification_or_unspecified(b, "entity")),
    }
}

fn classification_or_unspecified(b: &BreakCandidate, key: &str) -> String {
    b.classification(key)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(UNSPECIFIED)
        .to_string()
}

/// Count descending, then label ascending.
fn ranked(counts: HashMap<String, usize>) -> Vec<CountEntry> {
    let mut entries: Vec<CountEntry> = counts.into_iter().map(|(label, count)| CountEntry { label, count }).collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BreakType;
    use std::collections::BTreeMap;

    fn brk(break_type: BreakType, product: Option<&str>) -> BreakCandidate {
        let mut classifications = BTreeMap::new();
        if let Some(p) = product {
            classifications.insert("product".to_string(), p.to_string());
        }
        BreakCandidate {
            break_type,
            canonical_key: "k".into(),
            sources: Vec::new(),
            classifications,
            missing_sources: Vec::new(),
            mismatched_fields: Vec::new(),
        }
    }

    fn entry(label: &str, count: usize) -> CountEntry {
        CountEntry { label: label.into(), count }
    }

    #[test]
    fn summary_counts() {
        let result = MatchingResult {
            matched_count: 4,
            mismatched_count: 2,
            missing_count: 2,
            breaks: vec![
                brk(BreakType::Mismatch, Some("FX")),
                brk(BreakType::Mismatch, Some("RATES")),
                brk(BreakType::SourceMissing, Some("FX")),
                brk(BreakType::AnchorMissing, None),
            ],
        };
        let summary = summarize(&result);
        assert_eq!(summary.matched, 4);
        assert_eq!(summary.total_breaks, 4);
        assert_eq!(
            summary.by_type,
            [entry("mismatch", 2), entry("anchor_missing", 1), entry("source_missing", 1)]
        );
        assert_eq!(summary.by_product, [entry("FX", 2), entry("RATES", 1), entry(UNSPECIFIED, 1)]);
        assert_eq!(summary.by_entity, [entry(UNSPECIFIED, 4)]);
    }

    #[test]
    fn empty_result_has_empty_breakdowns() {
        let summary = summarize(&MatchingResult::default());
        assert_eq!(summary, RunSummary::default());
    }
}
