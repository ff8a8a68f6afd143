// CSV import/export of raw rows

use std::io::{Read, Write};
use std::path::Path;

use unirecon_core::{Row, Value};

use crate::error::IoError;

/// Read a delimited file into rows keyed by the header line.
pub fn read_rows(path: &Path) -> Result<Vec<Row>, IoError> {
    let content = read_file_as_utf8(path)?;
    let delimiter = sniff_delimiter(&content);
    rows_from_str(&content, delimiter)
}

/// Detect the most likely field delimiter by checking consistency across the first few lines.
///
/// For each candidate (tab, semicolon, comma, pipe), count fields per line. The delimiter
/// that produces the most consistent field count (>1 field) wins.
pub fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b'\t', b';', b',', b'|'];
    let sample_lines: Vec<&str> = content.lines().take(10).collect();

    if sample_lines.is_empty() {
        return b',';
    }

    let mut best = b',';
    let mut best_score = 0u64;

    for &delim in candidates {
        let counts: Vec<usize> = sample_lines
            .iter()
            .map(|line| {
                csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        // Header must split into >1 field
        if counts.first().copied().unwrap_or(0) <= 1 {
            continue;
        }

        // Consistent lines times field count; more columns breaks ties
        let target = counts[0];
        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * target as u64;

        if score > best_score {
            best_score = score;
            best = delim;
        }
    }

    best
}

/// Read file and convert to UTF-8 if needed (handles Windows-1252, Latin-1, etc.)
pub fn read_file_as_utf8(path: &Path) -> Result<String, IoError> {
    let mut file = std::fs::File::open(path).map_err(|e| IoError::file(path, e))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(|e| IoError::file(path, e))?;

    match String::from_utf8(bytes) {
        Ok(s) => Ok(s),
        Err(e) => {
            log::debug!("{} is not UTF-8, decoding as Windows-1252", path.display());
            let bytes = e.into_bytes();
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            Ok(decoded.into_owned())
        }
    }
}

/// Parse delimited text. Empty cells and cells missing from short lines read as null.
pub fn rows_from_str(content: &str, delimiter: u8) -> Result<Vec<Row>, IoError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    for (i, header) in headers.iter().enumerate() {
        if header.is_empty() {
            return Err(IoError::Format(format!("column {} has an empty header", i + 1)));
        }
        if headers[..i].contains(header) {
            return Err(IoError::Format(format!("duplicate column '{header}'")));
        }
    }

    let mut rows = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = result?;
        if record.len() > headers.len() {
            log::warn!(
                "line {}: {} fields for {} columns, extra fields ignored",
                line + 2,
                record.len(),
                headers.len()
            );
        }
        let mut row = Row::with_capacity(headers.len());
        for (i, header) in headers.iter().enumerate() {
            let value = match record.get(i) {
                Some(cell) if !cell.is_empty() => Value::text(cell),
                _ => Value::Null,
            };
            row.insert(header.as_str(), value);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Columns of all rows, in first-seen order.
pub fn header_of(rows: &[Row]) -> Vec<String> {
    let mut header: Vec<String> = Vec::new();
    for row in rows {
        for column in row.columns() {
            if !header.iter().any(|h| h == column) {
                header.push(column.to_string());
            }
        }
    }
    header
}

pub fn write_rows<W: Write>(writer: W, rows: &[Row]) -> Result<(), IoError> {
    let header = header_of(rows);
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(&header)?;
    for row in rows {
        writer.write_record(header.iter().map(|h| row.value(h).to_string()))?;
    }
    writer.flush().map_err(|e| IoError::Format(format!("failed to flush CSV output: {e}")))?;
    Ok(())
}

pub fn export(rows: &[Row], path: &Path) -> Result<(), IoError> {
    let file = std::fs::File::create(path).map_err(|e| IoError::file(path, e))?;
    write_rows(std::io::BufWriter::new(file), rows)
}
