//! Raw rows → canonical records for one configured source.

use unirecon_core::{CanonicalField, CanonicalRecord, Row};
use unirecon_transform::{CanonicalProjector, Evaluators, PlanProcessor};

use crate::config::SourceConfig;
use crate::error::ReconError;

/// Check the source's plan and mappings without touching any data.
pub fn validate_source(
    fields: &[CanonicalField],
    source: &SourceConfig,
    evaluators: &Evaluators,
) -> Result<(), ReconError> {
    let context = format!("source '{}'", source.code);
    if let Some(plan) = &source.plan {
        PlanProcessor::new(evaluators).validate(plan).map_err(|e| e.context(&context))?;
    }
    let mappings = source.effective_mappings(fields);
    CanonicalProjector::new(fields, &mappings, evaluators)
        .validate()
        .map_err(|e| e.context(&context))?;
    Ok(())
}

/// Apply the source's plan, then project every row onto the catalog.
pub fn stage_source(
    fields: &[CanonicalField],
    source: &SourceConfig,
    rows: Vec<Row>,
    evaluators: &Evaluators,
) -> Result<Vec<CanonicalRecord>, ReconError> {
    let context = format!("source '{}'", source.code);
    let raw = rows.len();
    let rows = match &source.plan {
        Some(plan) => PlanProcessor::new(evaluators).apply(plan, rows).map_err(|e| e.context(&context))?,
        None => rows,
    };

    let mappings = source.effective_mappings(fields);
    let projector = CanonicalProjector::new(fields, &mappings, evaluators);
    projector.validate().map_err(|e| e.context(&context))?;
    let records = projector.project_all(&rows).map_err(|e| e.context(&context))?;
    log::info!("source {}: {} raw rows staged as {} canonical records", source.code, raw, records.len());
    Ok(records)
}
