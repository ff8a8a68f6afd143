use unirecon_core::CoercionError;
use unirecon_transform::TransformationError;

#[derive(Debug, thiserror::Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Definition validation error (duplicate field, second anchor, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// The definition cannot be run at all: no fields, no key, no sources or no anchor.
    #[error("{0}")]
    MissingConfiguration(String),
    /// A canonical value could not be coerced during comparison. Aborts the run.
    #[error("data quality error: {0}")]
    DataQuality(#[from] CoercionError),
    /// The record store failed to read or write a batch.
    #[error("record store error: {0}")]
    Store(String),
    #[error(transparent)]
    Transform(#[from] TransformationError),
}
