use std::path::PathBuf;

use unirecon_recon::ReconError;

#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("{}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),
    #[error("{0}")]
    Format(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl IoError {
    pub(crate) fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IoError::File { path: path.into(), source }
    }
}

impl From<IoError> for ReconError {
    fn from(e: IoError) -> Self {
        ReconError::Store(e.to_string())
    }
}
