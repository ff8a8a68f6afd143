use std::collections::HashMap;

use unirecon_core::{ReconciliationDefinition, Row};

use crate::classify::resolve_classifications;
use crate::context;
use crate::error::ReconError;
use crate::matcher::differing_fields;
use crate::model::{BreakCandidate, BreakType, DynamicReconciliationContext, MatchingResult, SourceSnapshot};
use crate::store::RecordStore;

/// Load the context for `definition` from `store` and run one matching pass.
pub fn reconcile(definition: &ReconciliationDefinition, store: &dyn RecordStore) -> Result<MatchingResult, ReconError> {
    let ctx = context::load(definition, store)?;
    run(&ctx)
}

/// Compare the anchor against every other source. Any coercion failure
/// aborts the whole run.
pub fn run(ctx: &DynamicReconciliationContext) -> Result<MatchingResult, ReconError> {
    let anchor = ctx.anchor();
    let others = ctx.other_sources();
    let mut result = MatchingResult::default();

    // Anchor pass
    for (key, anchor_record) in anchor.iter() {
        let mut snapshots = Vec::with_capacity(others.len() + 1);
        snapshots.push(SourceSnapshot::new(anchor.code(), anchor_record.clone()));
        let mut missing_sources = Vec::new();
        let mut mismatched_fields: Vec<String> = Vec::new();

        for dataset in others {
            match dataset.get(key) {
                None => {
                    missing_sources.push(dataset.code().to_string());
                    snapshots.push(SourceSnapshot::new(dataset.code(), Row::new()));
                }
                Some(candidate) => {
                    for name in differing_fields(anchor_record, candidate, ctx.compare_fields())? {
                        if !mismatched_fields.iter().any(|f| f == name) {
                            mismatched_fields.push(name.to_string());
                        }
                    }
                    snapshots.push(SourceSnapshot::new(dataset.code(), candidate.clone()));
                }
            }
        }

        if missing_sources.is_empty() && mismatched_fields.is_empty() {
            result.matched_count += 1;
            continue;
        }

        let break_type = if missing_sources.is_empty() {
            result.mismatched_count += 1;
            BreakType::Mismatch
        } else {
            result.missing_count += 1;
            BreakType::SourceMissing
        };
        result.breaks.push(BreakCandidate {
            break_type,
            canonical_key: key.to_string(),
            classifications: resolve_classifications(&snapshots, ctx.classifier_fields()),
            sources: snapshots,
            missing_sources,
            mismatched_fields,
        });
    }

    // Keys only the comparison sources know about, merged across sources
    let mut orphans: Vec<(&str, Vec<SourceSnapshot>)> = Vec::new();
    let mut orphan_index: HashMap<&str, usize> = HashMap::new();
    for dataset in others {
        for (key, record) in dataset.iter().filter(|(k, _)| !anchor.contains(k)) {
            let snapshot = SourceSnapshot::new(dataset.code(), record.clone());
            match orphan_index.get(key) {
                Some(&pos) => orphans[pos].1.push(snapshot),
                None => {
                    orphan_index.insert(key, orphans.len());
                    orphans.push((key, vec![snapshot]));
                }
            }
        }
    }

    for (key, mut snapshots) in orphans {
        snapshots.push(SourceSnapshot::new(anchor.code(), Row::new()));
        result.missing_count += 1;
        result.breaks.push(BreakCandidate {
            break_type: BreakType::AnchorMissing,
            canonical_key: key.to_string(),
            classifications: resolve_classifications(&snapshots, ctx.classifier_fields()),
            sources: snapshots,
            missing_sources: vec![anchor.code().to_string()],
            mismatched_fields: Vec::new(),
        });
    }

    log::debug!(
        "Matching completed: definition={} matched={} mismatched={} missing={} breaks={} anchor={} otherSources={:?}",
        ctx.definition().code,
        result.matched_count,
        result.mismatched_count,
        result.missing_count,
        result.breaks.len(),
        anchor.code(),
        others.iter().map(|d| d.code()).collect::<Vec<_>>(),
    );

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::assemble;
    use crate::model::SourceDataset;
    use rust_decimal::Decimal;
    use unirecon_core::{
        CanonicalField, CanonicalRecord, ComparisonLogic, DataType, FieldRole, ReconciliationSource,
    };

    fn definition(sources: &[(&str, bool)]) -> ReconciliationDefinition {
        ReconciliationDefinition {
            code: "T".into(),
            name: None,
            fields: vec![
                CanonicalField::new("id", FieldRole::Key),
                CanonicalField::new("amount", FieldRole::Compare)
                    .with_data_type(DataType::Decimal)
                    .with_comparison(ComparisonLogic::NumericThreshold)
                    .with_threshold(Decimal::from(2)),
                CanonicalField::new("desk", FieldRole::Product),
            ],
            sources: sources.iter().map(|(c, a)| ReconciliationSource::new(*c, *a)).collect(),
        }
    }

    fn dataset(code: &str, anchor: bool, rows: &[(&str, &str)]) -> SourceDataset {
        let records = rows
            .iter()
            .map(|(id, amount)| {
                CanonicalRecord::new(*id, [("id", *id), ("amount", *amount)].into_iter().collect())
            })
            .collect();
        SourceDataset::new(ReconciliationSource::new(code, anchor), None, records)
    }

    fn run_with(datasets: Vec<SourceDataset>) -> Result<MatchingResult, ReconError> {
        let sources: Vec<(String, bool)> =
            datasets.iter().map(|d| (d.code().to_string(), d.source.anchor)).collect();
        let sources: Vec<(&str, bool)> = sources.iter().map(|(c, a)| (c.as_str(), *a)).collect();
        let ctx = assemble(&definition(&sources), datasets)?;
        run(&ctx)
    }

    #[test]
    fn identical_sources_fully_match() {
        let rows = [("A", "10"), ("B", "20.00")];
        let result = run_with(vec![dataset("X", true, &rows), dataset("Y", false, &[("A", "10.0"), ("B", "20")])])
            .unwrap();
        assert_eq!(result.matched_count, 2);
        assert!(!result.has_breaks());
    }

    #[test]
    fn source_missing_has_empty_snapshot() {
        let result = run_with(vec![
            dataset("BOOK", true, &[("A", "1")]),
            dataset("CPTY", false, &[]),
            dataset("GL", false, &[("A", "1")]),
        ])
        .unwrap();
        assert_eq!(result.missing_count, 1);
        let brk = &result.breaks[0];
        assert_eq!(brk.break_type, BreakType::SourceMissing);
        assert_eq!(brk.missing_sources, ["CPTY"]);
        assert_eq!(brk.sources.iter().map(|s| s.source.as_str()).collect::<Vec<_>>(), ["BOOK", "CPTY", "GL"]);
        assert_eq!(brk.snapshot("CPTY"), Some(&Row::new()));
    }

    #[test]
    fn missing_wins_over_mismatch() {
        let result = run_with(vec![
            dataset("BOOK", true, &[("A", "100")]),
            dataset("CPTY", false, &[("A", "500")]),
            dataset("GL", false, &[]),
        ])
        .unwrap();
        assert_eq!((result.mismatched_count, result.missing_count), (0, 1));
        assert_eq!(result.breaks[0].break_type, BreakType::SourceMissing);
        assert_eq!(result.breaks[0].mismatched_fields, ["amount"]);
    }

    #[test]
    fn anchor_missing_merges_sources() {
        let result = run_with(vec![
            dataset("BOOK", true, &[]),
            dataset("CPTY", false, &[("Z", "1")]),
            dataset("GL", false, &[("Z", "2")]),
        ])
        .unwrap();
        assert_eq!(result.missing_count, 1);
        assert_eq!(result.breaks.len(), 1);
        let brk = &result.breaks[0];
        assert_eq!(brk.break_type, BreakType::AnchorMissing);
        assert_eq!(brk.missing_sources, ["BOOK"]);
        assert_eq!(brk.sources.iter().map(|s| s.source.as_str()).collect::<Vec<_>>(), ["CPTY", "GL", "BOOK"]);
        assert_eq!(brk.snapshot("BOOK"), Some(&Row::new()));
    }

    #[test]
    fn classification_falls_back_to_other_sources() {
        let anchor = SourceDataset::new(ReconciliationSource::new("BOOK", true), None, vec![]);
        let cpty = SourceDataset::new(
            ReconciliationSource::new("CPTY", false),
            None,
            vec![CanonicalRecord::new("Z", [("id", "Z"), ("desk", "FX")].into_iter().collect())],
        );
        let result = run_with(vec![anchor, cpty]).unwrap();
        assert_eq!(result.breaks[0].classification("product"), Some("FX"));
    }

    #[test]
    fn bad_numeric_aborts_run() {
        let err = run_with(vec![dataset("BOOK", true, &[("A", "1")]), dataset("CPTY", false, &[("A", "one")])])
            .unwrap_err();
        assert!(matches!(err, ReconError::DataQuality(_)));
        assert!(err.to_string().contains("one"));
    }

    #[test]
    fn running_twice_is_identical() {
        let ctx = assemble(
            &definition(&[("BOOK", true), ("CPTY", false)]),
            vec![
                dataset("BOOK", true, &[("A", "1"), ("B", "2")]),
                dataset("CPTY", false, &[("B", "9"), ("C", "3")]),
            ],
        )
        .unwrap();
        assert_eq!(run(&ctx).unwrap(), run(&ctx).unwrap());
    }
}
