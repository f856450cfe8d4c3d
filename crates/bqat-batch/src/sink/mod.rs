//! Outcome routing
//!
//! Every settled task passes through [`OutcomeSink`], which decides whether
//! it becomes a table row, a log entry, or both. Workers call it directly,
//! so both artifacts sit behind their own lock.

pub mod run_log;
pub mod table;

pub use run_log::{read_entries, repair, RunLogWriter};
pub use table::{seam, CsvTable};

use bqat_common::Result;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{error, warn};

use crate::scan::{DirectoryScan, DirectoryTask, ScanError, ScanOutcome, ScanRecord};

/// Key a collaborator uses for per-item diagnostics
pub const LOG_KEY: &str = "log";
/// Key a collaborator uses to report an on-the-fly format conversion
pub const CONVERTED_KEY: &str = "converted";
/// Log key marking a sample that could not be decoded; such samples get no row
pub const LOAD_IMAGE_KEY: &str = "load image";
/// Log key for a task that failed outright
pub const TASK_ERROR_KEY: &str = "task error";

/// Where the dispatcher routes settled tasks
pub trait OutcomeRecorder: Send + Sync {
    /// Route one per-file outcome
    fn record(&self, outcome: ScanOutcome);

    /// Route the result of a whole-directory scan
    fn record_directory(
        &self,
        task: &DirectoryTask,
        result: std::result::Result<DirectoryScan, ScanError>,
    );
}

/// Thread-safe destination for settled tasks
#[derive(Debug)]
pub struct OutcomeSink {
    table: Mutex<CsvTable>,
    log: Mutex<RunLogWriter>,
}

impl OutcomeSink {
    pub fn new(table: CsvTable, log: RunLogWriter) -> Self {
        Self {
            table: Mutex::new(table),
            log: Mutex::new(log),
        }
    }

    /// Create both artifacts at the given paths
    pub fn create(table_path: impl Into<PathBuf>, log_path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(
            CsvTable::new(table_path),
            RunLogWriter::create(log_path)?,
        ))
    }

    fn table_row(&self, record: ScanRecord) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = table.append(&record) {
            error!(table = %table.path().display(), "Failed to append row: {}", e);
        }
    }

    fn log_entry(&self, entry: Value) {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = log.append(&entry) {
            error!(log = %log.path().display(), "Failed to append log entry: {}", e);
        }
    }

    /// Give back the artifacts for finalization
    pub fn into_parts(self) -> (CsvTable, RunLogWriter) {
        (
            self.table.into_inner().unwrap_or_else(PoisonError::into_inner),
            self.log.into_inner().unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Rows written so far
    pub fn rows(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).rows()
    }
}

impl OutcomeRecorder for OutcomeSink {
    /// Route one per-file outcome.
    ///
    /// Write failures are logged and remembered by the artifact; they surface
    /// again when the artifact is finalized.
    fn record(&self, outcome: ScanOutcome) {
        match outcome {
            ScanOutcome::Success { path, mut record } => {
                if let Some(converted) = record.remove(CONVERTED_KEY) {
                    if is_truthy(&converted) {
                        self.log_entry(json!({ "convert": converted, "file": path_text(&path) }));
                    }
                }

                let mut skip_row = false;
                if let Some(entry) = record.remove(LOG_KEY) {
                    let mut entry = into_object(entry);
                    skip_row = entry.get(LOAD_IMAGE_KEY).is_some_and(is_truthy);
                    entry.insert("file".to_string(), json!(path_text(&path)));
                    self.log_entry(Value::Object(entry));
                }

                if !skip_row {
                    self.table_row(with_file_first(record, &path));
                }
            }
            ScanOutcome::Failure { path, reason } => {
                warn!(file = %path.display(), "Task failed: {}", reason);
                self.log_entry(json!({ "file": path_text(&path), "task error": reason }));
            }
        }
    }

    fn record_directory(
        &self,
        task: &DirectoryTask,
        result: std::result::Result<DirectoryScan, ScanError>,
    ) {
        match result {
            Ok(scan) => {
                for record in scan.results {
                    self.table_row(record);
                }
                if let Some(mut entry) = scan.log {
                    entry.insert("directory".to_string(), json!(path_text(&task.dir)));
                    self.log_entry(Value::Object(entry));
                }
            }
            Err(e) => {
                warn!(directory = %task.dir.display(), "Directory task failed: {}", e);
                let message = e.to_string();
                let error = serde_json::from_str::<Value>(&message).unwrap_or(Value::String(message));
                self.log_entry(json!({
                    "directory": path_text(&task.dir),
                    "file count": task.file_count,
                    "error": error,
                }));
            }
        }
    }
}

fn path_text(path: &Path) -> String {
    path.display().to_string()
}

/// Null, false, zero and empty values are false
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("message".to_string(), other);
            map
        }
    }
}

/// Make sure the record carries its sample path as the leading `file` column
fn with_file_first(record: ScanRecord, path: &Path) -> ScanRecord {
    if record.contains_key("file") {
        return record;
    }
    let mut ordered = Map::with_capacity(record.len() + 1);
    ordered.insert("file".to_string(), json!(path_text(path)));
    ordered.extend(record);
    ordered
}
