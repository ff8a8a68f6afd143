//! `unirecon run` / `unirecon validate`: definition-driven reconciliation.

use std::path::{Path, PathBuf};

use serde::Serialize;
use unirecon_io::SqliteRecordStore;
use unirecon_recon::stage::{stage_source, validate_source};
use unirecon_recon::{
    reconcile, summarize, BatchId, DefinitionConfig, MatchingResult, MemoryRecordStore, RecordStore,
    RunSummary,
};
use unirecon_transform::Evaluators;

use crate::exit_codes::EXIT_BREAKS;
use crate::CliError;

/// Everything `--json` prints: what was staged, what matched, and the rollup.
#[derive(Serialize)]
struct RunReport<'a> {
    definition: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    batches: Vec<StagedBatch>,
    result: &'a MatchingResult,
    summary: &'a RunSummary,
}

#[derive(Serialize)]
struct StagedBatch {
    source: String,
    batch_id: BatchId,
    raw_rows: usize,
    records: usize,
}

fn load_config(config_path: &Path) -> Result<DefinitionConfig, CliError> {
    let config_str = std::fs::read_to_string(config_path)
        .map_err(|e| CliError::io(format!("cannot read config {}: {e}", config_path.display())))?;
    DefinitionConfig::from_toml(&config_str).map_err(CliError::recon)
}

fn open_store(store_path: Option<&Path>) -> Result<Box<dyn RecordStore>, CliError> {
    match store_path {
        Some(path) => {
            let store = SqliteRecordStore::open(path).map_err(CliError::file)?;
            log::debug!("staging into {}", path.display());
            Ok(Box::new(store))
        }
        None => Ok(Box::new(MemoryRecordStore::new())),
    }
}

pub fn cmd_run(
    config_path: PathBuf,
    json_output: bool,
    output_file: Option<PathBuf>,
    store_path: Option<PathBuf>,
    label: String,
) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let evaluators = Evaluators::new();
    let store = open_store(store_path.as_deref())?;

    // Source files are relative to the definition's directory
    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));

    let mut batches = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        let csv_path = base_dir.join(&source.file);
        let rows = unirecon_io::csv::read_rows(&csv_path).map_err(CliError::file)?;
        let raw_rows = rows.len();
        let records = stage_source(&config.fields, source, rows, &evaluators).map_err(CliError::recon)?;
        let count = records.len();
        let batch_id = store.ingest(&config.code, &source.code, &label, records).map_err(CliError::recon)?;
        batches.push(StagedBatch { source: source.code.clone(), batch_id, raw_rows, records: count });
    }

    let result = reconcile(&config.definition(), store.as_ref()).map_err(CliError::recon)?;
    let summary = summarize(&result);

    if json_output || output_file.is_some() {
        let report = RunReport {
            definition: &config.code,
            name: config.name.as_deref(),
            batches,
            result: &result,
            summary: &summary,
        };
        let json_str = serde_json::to_string_pretty(&report)
            .map_err(|e| CliError::io(format!("JSON serialization error: {e}")))?;

        if let Some(ref path) = output_file {
            std::fs::write(path, format!("{json_str}\n"))
                .map_err(|e| CliError::io(format!("cannot write output: {e}")))?;
            eprintln!("wrote {}", path.display());
        }
        if json_output {
            println!("{json_str}");
        }
    }

    // Human summary to stderr
    eprintln!(
        "{}: {} sources, {} matched, {} mismatched, {} missing",
        config.code,
        config.sources.len(),
        summary.matched,
        summary.mismatched,
        summary.missing,
    );
    for entry in &summary.by_type {
        eprintln!("  {:<16} {}", entry.label, entry.count);
    }

    if result.has_breaks() {
        let err = CliError { code: EXIT_BREAKS, message: format!("{} breaks found", summary.total_breaks), hint: None };
        if !json_output && output_file.is_none() {
            return Err(err.with_hint("rerun with --json to see the records behind each break"));
        }
        return Err(err);
    }

    Ok(())
}

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let evaluators = Evaluators::new();
    for source in &config.sources {
        validate_source(&config.fields, source, &evaluators).map_err(CliError::recon)?;
    }

    let anchor = config.sources.iter().find(|s| s.anchor).map_or("", |s| s.code.as_str());
    println!(
        "valid: {} ({} fields, {} sources, anchor {})",
        config.code,
        config.fields.len(),
        config.sources.len(),
        anchor
    );
    Ok(())
}
