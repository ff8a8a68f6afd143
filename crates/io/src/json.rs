// JSON export

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::error::IoError;

/// Pretty-print any serializable value (rows, matching results) followed by a newline.
pub fn write_pretty<W: Write, T: Serialize + ?Sized>(mut writer: W, value: &T) -> Result<(), IoError> {
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer).map_err(|e| IoError::Format(format!("failed to write JSON output: {e}")))?;
    Ok(())
}

pub fn export<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<(), IoError> {
    let file = File::create(path).map_err(|e| IoError::file(path, e))?;
    write_pretty(BufWriter::new(file), value)
}
