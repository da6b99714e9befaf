use crate::domain::{MrsError, MrsResult};
use serde::Serialize;
use std::fs;
use std::path::Path;

pub fn format_fixed_f64(value: f64, width: usize, precision: usize) -> String {
    format!(
        "{value:>width$.precision$}",
        width = width,
        precision = precision
    )
}

/// Shortest round-trippable rendering used for CSV cells; non-finite values become empty cells.
pub fn format_csv_f64(value: f64) -> String {
    if value.is_finite() {
        format!("{value}")
    } else {
        String::new()
    }
}

pub fn normalize_text_artifact(content: &str) -> String {
    let mut normalized = content.replace("\r\n", "\n").replace('\r', "\n");
    if !normalized.is_empty() && !normalized.ends_with('\n') {
        normalized.push('\n');
    }
    normalized
}

pub fn write_text_artifact(path: &Path, content: &str) -> MrsResult<()> {
    fs::write(path, normalize_text_artifact(content)).map_err(|error| {
        MrsError::io_system(
            "IO.OUTPUT_WRITE",
            format!("failed to write '{}': {error}", path.display()),
        )
    })
}

pub fn write_json_artifact<T: Serialize>(path: &Path, value: &T) -> MrsResult<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(|error| {
        MrsError::internal(
            "INTERNAL.JSON_ENCODE",
            format!("failed to encode '{}': {error}", path.display()),
        )
    })?;
    write_text_artifact(path, &rendered)
}

/// A rectangular table written as CSV.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CsvTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn new(header: Vec<String>) -> Self {
        Self {
            header,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    /// Cell lookup by row index and header label.
    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let column = self.header.iter().position(|label| label == column)?;
        self.rows.get(row)?.get(column).map(String::as_str)
    }

    /// Index of the first row whose leading cell equals `key`.
    pub fn row_index(&self, key: &str) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| row.first().is_some_and(|cell| cell == key))
    }

    /// Writes the header and rows to `path` through a `csv` writer.
    pub fn write(&self, path: &Path) -> MrsResult<()> {
        let write_error = |error: csv::Error| {
            MrsError::io_system(
                "IO.OUTPUT_WRITE",
                format!("failed to write '{}': {error}", path.display()),
            )
        };
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_path(path)
            .map_err(write_error)?;
        writer.write_record(&self.header).map_err(write_error)?;
        for row in &self.rows {
            writer.write_record(row).map_err(write_error)?;
        }
        writer.flush().map_err(|error| {
            MrsError::io_system(
                "IO.OUTPUT_WRITE",
                format!("failed to flush '{}': {error}", path.display()),
            )
        })
    }
}
