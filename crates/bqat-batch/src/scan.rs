//! Scan collaborator seam
//!
//! The quality assessment itself is delegated to an opaque collaborator. The
//! batch core only needs the interface below: a blocking per-file `scan`, and
//! optionally a per-directory `scan_directory` for collaborators that batch a
//! whole folder internally.

use bqat_common::Modality;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::progress::ProgressSource;

/// One result record, attribute name to value
pub type ScanRecord = Map<String, Value>;

/// Optional format conversion hints forwarded to the collaborator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversion {
    /// Formats that should be converted before assessment
    pub source: Vec<String>,
    /// Format to convert to
    pub target: Option<String>,
}

/// A unit of per-file work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTask {
    pub path: PathBuf,
    pub modality: Modality,
    pub conversion: Conversion,
}

/// A directory handed to a directory-batching collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryTask {
    pub dir: PathBuf,
    pub modality: Modality,
    /// Matching files in the directory, used to account for a failed directory
    pub file_count: u64,
}

/// Output of a directory-level scan
#[derive(Debug, Clone, Default)]
pub struct DirectoryScan {
    pub results: Vec<ScanRecord>,
    /// Shared log entry for the whole directory
    pub log: Option<ScanRecord>,
}

/// Per-item failure raised by a collaborator
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("{0}")]
    Failed(String),

    #[error("collaborator does not support {0} scans")]
    Unsupported(&'static str),

    #[error("collaborator panicked: {0}")]
    Panicked(String),

    #[error("invalid collaborator output: {0}")]
    InvalidOutput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Settled result of one per-file task
#[derive(Debug, Clone)]
pub enum ScanOutcome {
    Success { path: PathBuf, record: ScanRecord },
    Failure { path: PathBuf, reason: String },
}

impl ScanOutcome {
    pub fn path(&self) -> &Path {
        match self {
            ScanOutcome::Success { path, .. } | ScanOutcome::Failure { path, .. } => path,
        }
    }
}

/// How a collaborator wants its work cut up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanGranularity {
    /// One task per discovered file
    #[default]
    PerFile,
    /// One task per directory that directly contains matching files
    PerDirectory,
    /// A single task covering the whole input root
    WholeRun,
}

/// The external quality assessment routine
pub trait ScanCollaborator: Send + Sync {
    /// Assess one sample. Called from worker threads; may block.
    fn scan(&self, task: &ScanTask) -> Result<ScanRecord, ScanError>;

    fn granularity(&self) -> ScanGranularity {
        ScanGranularity::PerFile
    }

    /// Assess every sample of a directory in one go
    fn scan_directory(&self, task: &DirectoryTask) -> Result<DirectoryScan, ScanError> {
        let _ = task;
        Err(ScanError::Unsupported("directory"))
    }

    /// External progress signal for batched collaborators, if they emit one
    fn progress_signal(&self) -> Option<Box<dyn ProgressSource>> {
        None
    }
}

/// Run a collaborator on one task, turning errors and panics into a failure
pub fn run_scan(collaborator: &dyn ScanCollaborator, task: &ScanTask) -> ScanOutcome {
    let attempt = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        collaborator.scan(task)
    }))
    .unwrap_or_else(|payload| Err(ScanError::Panicked(panic_message(payload.as_ref()))));

    match attempt {
        Ok(record) => ScanOutcome::Success {
            path: task.path.clone(),
            record,
        },
        Err(e) => ScanOutcome::Failure {
            path: task.path.clone(),
            reason: e.to_string(),
        },
    }
}

/// Directory counterpart of [`run_scan`]
pub fn run_directory_scan(
    collaborator: &dyn ScanCollaborator,
    task: &DirectoryTask,
) -> Result<DirectoryScan, ScanError> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        collaborator.scan_directory(task)
    }))
    .unwrap_or_else(|payload| Err(ScanError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
