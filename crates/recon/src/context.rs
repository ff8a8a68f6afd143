//! Assembles the per-run [`DynamicReconciliationContext`].

use unirecon_core::{CanonicalField, FieldRole, ReconciliationDefinition};

use crate::error::ReconError;
use crate::model::{DynamicReconciliationContext, SourceDataset};
use crate::store::RecordStore;

/// Check the definition, then read every source's latest batch in one call
/// to the store. A source without a batch contributes an empty dataset.
pub fn load(
    definition: &ReconciliationDefinition,
    store: &dyn RecordStore,
) -> Result<DynamicReconciliationContext, ReconError> {
    check_runnable(definition)?;

    let codes: Vec<String> = definition.sources.iter().map(|s| s.code.clone()).collect();
    let mut batches = store.latest_batches(&definition.code, &codes)?;

    let datasets = definition
        .sources
        .iter()
        .map(|source| match batches.remove(&source.code) {
            Some(batch) => SourceDataset::new(source.clone(), Some(batch.info), batch.records),
            None => {
                log::warn!("No data batch found for source {} in definition {}", source.code, definition.code);
                SourceDataset::new(source.clone(), None, Vec::new())
            }
        })
        .collect();

    assemble(definition, datasets)
}

/// Build a context from datasets already in hand. `datasets` must hold one
/// entry per configured source.
pub fn assemble(
    definition: &ReconciliationDefinition,
    datasets: Vec<SourceDataset>,
) -> Result<DynamicReconciliationContext, ReconError> {
    check_runnable(definition)?;
    let anchor_code = definition
        .anchor()
        .map(|s| s.code.clone())
        .ok_or_else(|| ReconError::MissingConfiguration(NO_ANCHOR.into()))?;

    let mut anchor = None;
    let mut others = Vec::with_capacity(datasets.len().saturating_sub(1));
    for dataset in datasets {
        if anchor.is_none() && dataset.code() == anchor_code {
            anchor = Some(dataset);
        } else {
            others.push(dataset);
        }
    }
    let anchor = anchor.ok_or_else(|| {
        ReconError::MissingConfiguration(format!("Anchor dataset '{anchor_code}' could not be resolved"))
    })?;

    Ok(DynamicReconciliationContext {
        definition: definition.clone(),
        key_fields: definition.fields_with_role(FieldRole::Key).cloned().collect(),
        compare_fields: definition.fields_with_role(FieldRole::Compare).cloned().collect(),
        classifier_fields: classifier_fields(&definition.fields),
        anchor,
        others,
    })
}

const NO_ANCHOR: &str = "Reconciliation definition must designate an anchor source";
const MANY_ANCHORS: &str = "Reconciliation definition must designate exactly one anchor source";

fn check_runnable(definition: &ReconciliationDefinition) -> Result<(), ReconError> {
    if definition.fields.is_empty() {
        return Err(ReconError::MissingConfiguration(
            "Reconciliation definition lacks canonical field configuration".into(),
        ));
    }
    if definition.fields_with_role(FieldRole::Key).next().is_none() {
        return Err(ReconError::MissingConfiguration("At least one canonical KEY field is required".into()));
    }
    if definition.sources.is_empty() {
        return Err(ReconError::MissingConfiguration(
            "Reconciliation definition has no configured sources".into(),
        ));
    }
    match definition.sources.iter().filter(|s| s.anchor).count() {
        0 => Err(ReconError::MissingConfiguration(NO_ANCHOR.into())),
        1 => Ok(()),
        n => Err(ReconError::MissingConfiguration(format!("{MANY_ANCHORS}, found {n}"))),
    }
}

/// Classifier fields sorted by display order; unordered fields keep catalog order at the end.
fn classifier_fields(fields: &[CanonicalField]) -> Vec<CanonicalField> {
    let mut classifiers: Vec<CanonicalField> = fields.iter().filter(|f| f.is_classifier()).cloned().collect();
    classifiers.sort_by_key(|f| (f.display_order.is_none(), f.display_order));
    classifiers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;
    use unirecon_core::{CanonicalRecord, ReconciliationSource, Row};

    fn definition() -> ReconciliationDefinition {
        ReconciliationDefinition {
            code: "D".into(),
            name: None,
            fields: vec![
                CanonicalField::new("id", FieldRole::Key),
                CanonicalField::new("amount", FieldRole::Compare),
                CanonicalField::new("entity", FieldRole::Entity).with_display_order(2),
                CanonicalField::new("desk", FieldRole::Product).with_display_order(1),
                CanonicalField::new("region", FieldRole::Attribute).with_classifier_tag("region"),
            ],
            sources: vec![ReconciliationSource::new("CPTY", false), ReconciliationSource::new("BOOK", true)],
        }
    }

    fn message(result: Result<DynamicReconciliationContext, ReconError>) -> String {
        match result {
            Err(ReconError::MissingConfiguration(msg)) => msg,
            other => panic!("expected missing configuration, got {other:?}"),
        }
    }

    #[test]
    fn splits_anchor_from_other_sources() {
        let store = MemoryRecordStore::new();
        store.ingest("D", "BOOK", "b1", vec![CanonicalRecord::new("1", Row::new())]).unwrap();
        let ctx = load(&definition(), &store).unwrap();
        assert_eq!(ctx.anchor().code(), "BOOK");
        assert_eq!(ctx.anchor().len(), 1);
        assert!(ctx.anchor().batch.is_some());

        // CPTY never ingested: empty dataset, not an error
        assert_eq!(ctx.other_sources().len(), 1);
        assert_eq!(ctx.other_sources()[0].code(), "CPTY");
        assert!(ctx.other_sources()[0].is_empty());
        assert!(ctx.other_sources()[0].batch.is_none());
    }

    #[test]
    fn field_groups_follow_roles_and_display_order() {
        let ctx = load(&definition(), &MemoryRecordStore::new()).unwrap();
        let names = |fields: &[CanonicalField]| fields.iter().map(|f| f.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(ctx.key_fields()), ["id"]);
        assert_eq!(names(ctx.compare_fields()), ["amount"]);
        assert_eq!(names(ctx.classifier_fields()), ["desk", "entity", "region"]);
    }

    #[test]
    fn unrunnable_definitions_are_rejected() {
        let store = MemoryRecordStore::new();

        let mut def = definition();
        def.fields.clear();
        assert_eq!(message(load(&def, &store)), "Reconciliation definition lacks canonical field configuration");

        let mut def = definition();
        def.fields.retain(|f| f.role != FieldRole::Key);
        assert_eq!(message(load(&def, &store)), "At least one canonical KEY field is required");

        let mut def = definition();
        def.sources.clear();
        assert_eq!(message(load(&def, &store)), "Reconciliation definition has no configured sources");

        let mut def = definition();
        def.sources.iter_mut().for_each(|s| s.anchor = false);
        assert_eq!(message(load(&def, &store)), NO_ANCHOR);

        let mut def = definition();
        def.sources.iter_mut().for_each(|s| s.anchor = true);
        assert_eq!(message(load(&def, &store)), format!("{MANY_ANCHORS}, found 2"));
    }

    #[test]
    fn assemble_rejects_second_anchor() {
        let mut def = definition();
        def.sources.push(ReconciliationSource::new("GL", true));
        let datasets = def.sources.iter().map(|s| SourceDataset::new(s.clone(), None, Vec::new())).collect();
        assert_eq!(message(assemble(&def, datasets)), format!("{MANY_ANCHORS}, found 2"));
    }
}
