//! Finished tables loaded back into memory for filtering and reporting

use bqat_common::{BqatError, Result};
use csv::{ReaderBuilder, WriterBuilder};
use std::path::Path;

/// Column holding the sample path; always kept by projections
pub const FILE_COLUMN: &str = "file";

/// A header plus string rows, as read from a CSV table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Dataset {
    pub fn new(header: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { header, rows }
    }

    /// Load a CSV table. Short rows are padded to the header width.
    pub fn read(path: &Path) -> Result<Self> {
        let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
        let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let mut row: Vec<String> = record?.iter().map(str::to_string).collect();
            row.resize(header.len(), String::new());
            rows.push(row);
        }

        Ok(Self { header, rows })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut writer = WriterBuilder::new().from_path(path)?;
        writer.write_record(&self.header)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    /// Index of `name`, or [`BqatError::UnknownColumn`]
    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| BqatError::UnknownColumn(name.to_string()))
    }

    /// Cells of one column, top to bottom
    pub fn column(&self, index: usize) -> impl Iterator<Item = &str> + '_ {
        self.rows
            .iter()
            .map(move |row| row.get(index).map(String::as_str).unwrap_or(""))
    }
}
