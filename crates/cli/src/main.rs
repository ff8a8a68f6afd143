// unirecon - config-driven multi-source reconciliation from the command line

mod exit_codes;
mod recon;
mod transform;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use unirecon_io::IoError;
use unirecon_recon::ReconError;
use unirecon_transform::TransformationError;

use exit_codes::{recon_exit_code, EXIT_IO, EXIT_SUCCESS, EXIT_TRANSFORM, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "unirecon")]
#[command(about = "Reconcile canonical records across configured data sources")]
#[command(version)]
struct Cli {
    /// Log at debug level, overriding RUST_LOG
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage every source of a definition and run the matching engine
    #[command(after_help = "\
Examples:
  unirecon run fx-trades.recon.toml
  unirecon run fx-trades.recon.toml --json
  unirecon run fx-trades.recon.toml --output result.json
  unirecon run fx-trades.recon.toml --store recon.sqlite --label 2024-03-15

Exit code 1 means the run completed and found breaks.")]
    Run {
        /// Path to the .recon.toml definition
        config: PathBuf,

        /// Print the result as JSON to stdout
        #[arg(long)]
        json: bool,

        /// Write the JSON result to a file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Stage batches in a SQLite file instead of memory
        #[arg(long)]
        store: Option<PathBuf>,

        /// Label recorded on every ingested batch
        #[arg(long, default_value = "cli")]
        label: String,
    },

    /// Apply a transformation plan to one CSV file
    #[command(after_help = "\
Examples:
  unirecon transform plan.toml trades.csv
  unirecon transform plan.json trades.csv --json
  unirecon transform plan.toml trades.csv --output normalized.csv")]
    Transform {
        /// Plan file (.toml or .json)
        plan: PathBuf,

        /// Input CSV (delimiter is detected)
        input: PathBuf,

        /// Write output to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Emit rows as a JSON array instead of CSV
        #[arg(long)]
        json: bool,
    },

    /// Check a definition and its source plans without reading any data
    #[command(after_help = "\
Examples:
  unirecon validate fx-trades.recon.toml")]
    Validate {
        /// Path to the .recon.toml definition
        config: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Run { config, json, output, store, label } => recon::cmd_run(config, json, output, store, label),
        Commands::Transform { plan, input, output, json } => transform::cmd_transform(plan, input, output, json),
        Commands::Validate { config } => recon::cmd_validate(config),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

/// Library crates log through `log`; the subscriber picks those records up
/// via its `tracing-log` bridge.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_IO, message: msg.into(), hint: None }
    }

    /// Create error from a library error with the matching exit code.
    pub fn recon(err: ReconError) -> Self {
        let hint = match &err {
            ReconError::MissingConfiguration(_) => {
                Some("every definition needs fields, a key field, sources and one anchor".to_string())
            }
            ReconError::DataQuality(_) => Some("check the field's data_type against the staged values".to_string()),
            _ => None,
        };
        Self { code: recon_exit_code(&err), message: err.to_string(), hint }
    }

    pub fn transform(err: TransformationError) -> Self {
        Self { code: EXIT_TRANSFORM, message: err.to_string(), hint: None }
    }

    pub fn file(err: IoError) -> Self {
        Self::io(err.to_string())
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
