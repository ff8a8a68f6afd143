//! `unirecon transform`: run one plan over one CSV file.

use std::path::{Path, PathBuf};

use unirecon_transform::{Evaluators, PlanProcessor, SourceTransformationPlan, TransformationError};

use crate::CliError;

fn load_plan(plan_path: &Path) -> Result<SourceTransformationPlan, CliError> {
    let ext = plan_path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    let parse: fn(&str) -> Result<SourceTransformationPlan, TransformationError> = match ext.as_deref() {
        Some("toml") => SourceTransformationPlan::from_toml,
        Some("json") => SourceTransformationPlan::from_json,
        _ => {
            return Err(CliError::args(format!("unsupported plan file: {}", plan_path.display()))
                .with_hint("plans are .toml or .json"))
        }
    };
    let content = std::fs::read_to_string(plan_path)
        .map_err(|e| CliError::io(format!("cannot read plan {}: {e}", plan_path.display())))?;
    parse(&content).map_err(CliError::transform)
}

pub fn cmd_transform(
    plan_path: PathBuf,
    input: PathBuf,
    output: Option<PathBuf>,
    json_output: bool,
) -> Result<(), CliError> {
    let plan = load_plan(&plan_path)?;
    let evaluators = Evaluators::new();
    let processor = PlanProcessor::new(&evaluators);
    processor.validate(&plan).map_err(CliError::transform)?;

    let rows = unirecon_io::csv::read_rows(&input).map_err(CliError::file)?;
    let rows_in = rows.len();
    let rows = processor.apply(&plan, rows).map_err(CliError::transform)?;

    match (output, json_output) {
        (Some(path), true) => unirecon_io::json::export(&rows, &path).map_err(CliError::file)?,
        (Some(path), false) => unirecon_io::csv::export(&rows, &path).map_err(CliError::file)?,
        (None, true) => unirecon_io::json::write_pretty(std::io::stdout().lock(), &rows).map_err(CliError::file)?,
        (None, false) => unirecon_io::csv::write_rows(std::io::stdout().lock(), &rows).map_err(CliError::file)?,
    }

    eprintln!("{} rows in, {} rows out", rows_in, rows.len());
    Ok(())
}
