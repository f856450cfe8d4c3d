//! Tabular aggregator
//!
//! Rows stream into the CSV as they arrive, aligned to the widest header seen
//! so far. That header only grows (new names are appended in first-seen
//! order), so a row written early is a prefix of the final column layout.
//! The header itself is kept in a side file and written into the table once,
//! by [`seam`], when the run is over.

use bqat_common::{BqatError, Result};
use csv::{ReaderBuilder, WriterBuilder};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::scan::ScanRecord;

/// Side file holding the widest header, e.g. `.output_face_x.csv.header`
pub fn header_path_for(table: &Path) -> PathBuf {
    let name = table
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "output.csv".to_string());
    table.with_file_name(format!(".{name}.header"))
}

/// CSV table whose columns are discovered while rows are appended
#[derive(Debug)]
pub struct CsvTable {
    path: PathBuf,
    header_path: PathBuf,
    header: Vec<String>,
    index: HashMap<String, usize>,
    rows: usize,
    writer: Option<csv::Writer<File>>,
    /// First write error; the table is unusable once set
    broken: Option<String>,
}

impl CsvTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            header_path: header_path_for(&path),
            path,
            header: Vec::new(),
            index: HashMap::new(),
            rows: 0,
            writer: None,
            broken: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Widest header observed so far
    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Append one record as a row.
    ///
    /// The row is built in full before anything touches the file and written
    /// with a single flush, so a record is either fully present or absent.
    pub fn append(&mut self, record: &ScanRecord) -> Result<()> {
        if let Some(ref reason) = self.broken {
            return Err(BqatError::aggregation(self.path.display().to_string(), reason));
        }

        match self.try_append(record) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.broken = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn try_append(&mut self, record: &ScanRecord) -> Result<()> {
        let cells = flatten_record(record);

        let width_before = self.header.len();
        for (name, _) in &cells {
            if !self.index.contains_key(name) {
                self.index.insert(name.clone(), self.header.len());
                self.header.push(name.clone());
            }
        }
        if self.header.len() > width_before {
            self.write_header_file()?;
            debug!(
                columns = self.header.len(),
                table = %self.path.display(),
                "Header widened"
            );
        }

        let mut row = vec![String::new(); self.header.len()];
        for (name, value) in cells {
            if let Some(&i) = self.index.get(&name) {
                row[i] = value;
            }
        }

        if self.writer.is_none() {
            self.writer = Some(open_rows_writer(&self.path)?);
        }
        if let Some(ref mut writer) = self.writer {
            writer.write_record(&row)?;
            writer.flush()?;
            self.rows += 1;
        }

        Ok(())
    }

    fn write_header_file(&self) -> Result<()> {
        if let Some(parent) = self.header_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = WriterBuilder::new().from_path(&self.header_path)?;
        writer.write_record(&self.header)?;
        writer.flush()?;
        Ok(())
    }

    /// Apply the final header and close the table.
    ///
    /// Returns `Ok(None)` when no row was ever written; in that case no table
    /// file is left behind.
    pub fn finalize(mut self) -> Result<Option<PathBuf>> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }

        if let Some(reason) = self.broken.take() {
            return Err(BqatError::aggregation(self.path.display().to_string(), reason));
        }

        if self.rows == 0 {
            remove_if_exists(&self.path)?;
            remove_if_exists(&self.header_path)?;
            debug!(table = %self.path.display(), "No rows written, table discarded");
            return Ok(None);
        }

        seam(&self.path)?;
        Ok(Some(self.path))
    }
}

fn open_rows_writer(path: &Path) -> Result<csv::Writer<File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(file))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Write the recorded widest header into a headerless table.
///
/// Data rows are copied verbatim, padded with empty cells up to the header
/// width. The side file is removed afterwards. Also usable on a table left
/// behind by an interrupted run.
pub fn seam(table: &Path) -> Result<()> {
    let header_path = header_path_for(table);
    let header = read_header_file(&header_path)?;

    let staged = table.with_extension("csv.seam");
    {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(table)?;
        let mut writer = WriterBuilder::new().from_path(&staged)?;
        writer.write_record(&header)?;

        let mut padded = csv::StringRecord::new();
        for row in reader.records() {
            let row = row?;
            if row.len() > header.len() {
                return Err(BqatError::aggregation(
                    table.display().to_string(),
                    format!(
                        "row has {} cells but header has {} columns",
                        row.len(),
                        header.len()
                    ),
                ));
            }
            padded.clear();
            padded.extend(row.iter());
            for _ in row.len()..header.len() {
                padded.push_field("");
            }
            writer.write_record(&padded)?;
        }
        writer.flush()?;
    }

    std::fs::rename(&staged, table)?;
    if let Err(e) = std::fs::remove_file(&header_path) {
        warn!(path = %header_path.display(), "Failed to remove header side file: {}", e);
    }

    Ok(())
}

fn read_header_file(path: &Path) -> Result<Vec<String>> {
    let mut reader = ReaderBuilder::new().has_headers(false).from_path(path)?;
    match reader.records().next() {
        Some(record) => Ok(record?.iter().map(str::to_string).collect()),
        None => Err(BqatError::aggregation(
            path.display().to_string(),
            "header side file is empty",
        )),
    }
}

/// Flatten a record into `(column, cell)` pairs.
///
/// Nested objects become `parent.child` columns, arrays are kept as JSON
/// text and nulls become empty cells. A repeated name keeps its last value.
pub fn flatten_record(record: &ScanRecord) -> Vec<(String, String)> {
    let mut cells: Vec<(String, String)> = Vec::with_capacity(record.len());
    for (key, value) in record {
        flatten_value(key.clone(), value, &mut cells);
    }

    let mut seen: HashMap<String, usize> = HashMap::with_capacity(cells.len());
    let mut unique: Vec<(String, String)> = Vec::with_capacity(cells.len());
    for (name, value) in cells {
        match seen.get(&name) {
            Some(&i) => unique[i].1 = value,
            None => {
                seen.insert(name.clone(), unique.len());
                unique.push((name, value));
            }
        }
    }
    unique
}

fn flatten_value(name: String, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten_value(format!("{name}.{key}"), nested, out);
            }
        }
        Value::Null => out.push((name, String::new())),
        Value::String(s) => out.push((name, s.clone())),
        Value::Bool(b) => out.push((name, b.to_string())),
        Value::Number(n) => out.push((name, n.to_string())),
        Value::Array(_) => out.push((name, value.to_string())),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(value: Value) -> ScanRecord {
        value.as_object().cloned().unwrap()
    }

    fn read_table(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
        let mut reader = ReaderBuilder::new().from_path(path).unwrap();
        let header = reader.headers().unwrap().iter().map(str::to_string).collect();
        let rows = reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect();
        (header, rows)
    }

    #[test]
    fn test_header_is_union_in_first_seen_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("output_face.csv");
        let mut table = CsvTable::new(&path);

        table.append(&record(json!({"file": "a.png", "sharpness": 1}))).unwrap();
        table
            .append(&record(json!({"file": "b.png", "contrast": 0.5, "sharpness": 2})))
            .unwrap();
        table.append(&record(json!({"file": "c.png"}))).unwrap();

        assert_eq!(table.header(), ["file", "sharpness", "contrast"]);
        let finalized = table.finalize().unwrap().unwrap();

        let (header, rows) = read_table(&finalized);
        assert_eq!(header, vec!["file", "sharpness", "contrast"]);
        assert_eq!(
            rows,
            vec![
                vec!["a.png", "1", ""],
                vec!["b.png", "2", "0.5"],
                vec!["c.png", "", ""],
            ]
        );
        assert!(!header_path_for(&path).exists());
    }

    #[test]
    fn test_rows_before_finalize_have_no_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let mut table = CsvTable::new(&path);
        table.append(&record(json!({"file": "a.png", "q": 3}))).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, "a.png,3\n");
        let side = std::fs::read_to_string(header_path_for(&path)).unwrap();
        assert_eq!(side, "file,q\n");
    }

    #[test]
    fn test_empty_table_leaves_no_artifact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let table = CsvTable::new(&path);
        assert!(table.finalize().unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_values_with_commas_are_quoted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let mut table = CsvTable::new(&path);
        table
            .append(&record(json!({"file": "x, y.png", "note": "a \"b\""})))
            .unwrap();
        let finalized = table.finalize().unwrap().unwrap();
        let (_, rows) = read_table(&finalized);
        assert_eq!(rows[0], vec!["x, y.png", "a \"b\""]);
    }

    #[test]
    fn test_seam_recovers_interrupted_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, "a.png,1\nb.png,2,9\n").unwrap();
        std::fs::write(header_path_for(&path), "file,q,extra\n").unwrap();

        seam(&path).unwrap();
        let (header, rows) = read_table(&path);
        assert_eq!(header, vec!["file", "q", "extra"]);
        assert_eq!(rows[0], vec!["a.png", "1", ""]);
        assert_eq!(rows[1], vec!["b.png", "2", "9"]);
    }

    #[test]
    fn test_flatten_nested_and_scalars() {
        let cells = flatten_record(&record(json!({
            "file": "a.png",
            "pose": {"yaw": 1.5, "pitch": null},
            "ok": true,
            "landmarks": [1, 2]
        })));
        assert_eq!(
            cells,
            vec![
                ("file".to_string(), "a.png".to_string()),
                ("pose.yaw".to_string(), "1.5".to_string()),
                ("pose.pitch".to_string(), String::new()),
                ("ok".to_string(), "true".to_string()),
                ("landmarks".to_string(), "[1,2]".to_string()),
            ]
        );
    }

    proptest! {
        #[test]
        fn prop_every_row_spans_the_header(
            records in prop::collection::vec(
                prop::collection::btree_map("[a-e]", 0u32..100, 0..5),
                1..20,
            )
        ) {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("prop.csv");
            let mut table = CsvTable::new(&path);

            let mut expected_header: Vec<String> = vec!["file".to_string()];
            for (i, fields) in records.iter().enumerate() {
                let mut rec = ScanRecord::new();
                rec.insert("file".into(), json!(format!("{i}.png")));
                for (k, v) in fields {
                    rec.insert(k.clone(), json!(v));
                    if !expected_header.contains(k) {
                        expected_header.push(k.clone());
                    }
                }
                table.append(&rec).unwrap();
            }

            let finalized = table.finalize().unwrap().unwrap();
            let (header, rows) = read_table(&finalized);
            prop_assert_eq!(&header, &expected_header);
            prop_assert_eq!(rows.len(), records.len());
            for row in rows {
                prop_assert_eq!(row.len(), header.len());
            }
        }
    }
}
