//! Subprocess scan collaborator
//!
//! Runs an external scanner program per sample:
//!
//! ```text
//! <program> --mode <modality> --input <path> [--source a,b] [--target fmt]
//! ```
//!
//! and reads one JSON object from its stdout. In directory and whole-run
//! granularity `--type folder` is added, `--input` names a directory, and the
//! program prints
//! `{"results": [...], "log": {...}}`. A non-zero exit is a failed scan whose
//! reason is the program's stderr.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::debug;

use crate::config::DEFAULT_COUNTER_LINES_PER_ITEM;
use crate::progress::{CounterFile, ProgressSource};
use crate::scan::{
    DirectoryScan, DirectoryTask, ScanCollaborator, ScanError, ScanGranularity, ScanRecord,
    ScanTask,
};

#[derive(Debug, Clone)]
pub struct CommandScanner {
    program: PathBuf,
    granularity: ScanGranularity,
    counter_file: Option<PathBuf>,
    lines_per_item: u64,
}

impl CommandScanner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            granularity: ScanGranularity::PerFile,
            counter_file: None,
            lines_per_item: DEFAULT_COUNTER_LINES_PER_ITEM,
        }
    }

    /// Hand the scanner directories, or the whole input, instead of files
    pub fn with_granularity(mut self, granularity: ScanGranularity) -> Self {
        self.granularity = granularity;
        self
    }

    /// Poll `path` for progress, one item per `lines_per_item` lines
    pub fn counter_file(mut self, path: impl Into<PathBuf>, lines_per_item: u64) -> Self {
        self.counter_file = Some(path.into());
        self.lines_per_item = lines_per_item;
        self
    }

    fn invoke(&self, command: &mut Command) -> Result<Vec<u8>, ScanError> {
        let Output {
            status,
            stdout,
            stderr,
        } = command.output()?;

        if !status.success() {
            let reason = String::from_utf8_lossy(&stderr).trim().to_string();
            return Err(ScanError::Failed(if reason.is_empty() {
                format!("{} exited with {}", self.program.display(), status)
            } else {
                reason
            }));
        }
        Ok(stdout)
    }

    fn base_command(&self, modality: &str, input: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command.arg("--mode").arg(modality).arg("--input").arg(input);
        command
    }
}

impl ScanCollaborator for CommandScanner {
    fn scan(&self, task: &ScanTask) -> Result<ScanRecord, ScanError> {
        let mut command = self.base_command(task.modality.as_str(), &task.path);
        if !task.conversion.source.is_empty() {
            command.arg("--source").arg(task.conversion.source.join(","));
        }
        if let Some(ref target) = task.conversion.target {
            command.arg("--target").arg(target);
        }

        debug!(file = %task.path.display(), "Invoking scanner");
        let stdout = self.invoke(&mut command)?;
        match serde_json::from_slice::<Value>(&stdout) {
            Ok(Value::Object(record)) => Ok(record),
            Ok(_) => Err(ScanError::InvalidOutput("expected a JSON object".into())),
            Err(e) => Err(ScanError::InvalidOutput(e.to_string())),
        }
    }

    fn granularity(&self) -> ScanGranularity {
        self.granularity
    }

    fn scan_directory(&self, task: &DirectoryTask) -> Result<DirectoryScan, ScanError> {
        let mut command = self.base_command(task.modality.as_str(), &task.dir);
        command.arg("--type").arg("folder");

        debug!(directory = %task.dir.display(), "Invoking scanner on directory");
        let stdout = self.invoke(&mut command)?;
        let mut output = match serde_json::from_slice::<Value>(&stdout) {
            Ok(Value::Object(output)) => output,
            Ok(_) => return Err(ScanError::InvalidOutput("expected a JSON object".into())),
            Err(e) => return Err(ScanError::InvalidOutput(e.to_string())),
        };

        let results = match output.remove("results") {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(record) => Some(record),
                    _ => None,
                })
                .collect(),
            _ => return Err(ScanError::InvalidOutput("missing results array".into())),
        };
        let log = match output.remove("log") {
            Some(Value::Object(log)) if !log.is_empty() => Some(log),
            _ => None,
        };

        Ok(DirectoryScan { results, log })
    }

    fn progress_signal(&self) -> Option<Box<dyn ProgressSource>> {
        self.counter_file.as_ref().map(|path| {
            Box::new(CounterFile::new(path, self.lines_per_item)) as Box<dyn ProgressSource>
        })
    }
}
