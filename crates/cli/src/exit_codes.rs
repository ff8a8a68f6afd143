//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract: scripts rely on them.
//!
//! | Code | Meaning                                              |
//! |------|------------------------------------------------------|
//! | 0    | Success (no breaks)                                  |
//! | 1    | Reconciliation completed and found breaks            |
//! | 2    | CLI usage error (bad args, unsupported file type)    |
//! | 3    | Definition invalid (parse, validation, missing parts)|
//! | 4    | Transformation failure (plan, mapping, evaluator)    |
//! | 5    | Data-quality failure while matching                  |
//! | 6    | I/O failure (files, CSV, record store)               |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Map it in `recon_exit_code` if a library error produces it

use unirecon_recon::ReconError;

/// Success - command completed, nothing to report.
pub const EXIT_SUCCESS: u8 = 0;

/// Breaks found. Like `diff(1)`, exit 1 means "sources differ."
pub const EXIT_BREAKS: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

/// Definition could not be parsed, failed validation, or lacks fields,
/// keys, sources or an anchor.
pub const EXIT_CONFIG: u8 = 3;

/// A transformation plan or field mapping failed to validate or evaluate.
pub const EXIT_TRANSFORM: u8 = 4;

/// A value could not be coerced to its field's data type during matching.
pub const EXIT_DATA_QUALITY: u8 = 5;

/// Reading inputs, writing outputs, or talking to the record store failed.
pub const EXIT_IO: u8 = 6;

/// Map a library error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) | ReconError::MissingConfiguration(_) => {
            EXIT_CONFIG
        }
        ReconError::Transform(_) => EXIT_TRANSFORM,
        ReconError::DataQuality(_) => EXIT_DATA_QUALITY,
        ReconError::Store(_) => EXIT_IO,
    }
}
