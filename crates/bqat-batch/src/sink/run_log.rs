//! Run log writer
//!
//! The log is a JSON array built incrementally on disk: `[` on create, each
//! entry followed by `,`, and a closing `]` written over the trailing comma
//! when the run finishes. A crash leaves a file that [`repair`] can close.

use bqat_common::{BqatError, Result};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogState {
    /// `[` written, no entries yet
    Empty,
    /// At least one `entry,` written
    HasEntries,
    /// `]` written; further appends are refused
    Closed,
}

/// Incremental JSON array writer for per-item diagnostics
#[derive(Debug)]
pub struct RunLogWriter {
    path: PathBuf,
    file: File,
    state: LogState,
    entries: usize,
}

impl RunLogWriter {
    /// Create the log file and write the opening bracket
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| BqatError::aggregation(path.display().to_string(), e))?;
        file.write_all(b"[")
            .map_err(|e| BqatError::aggregation(path.display().to_string(), e))?;

        Ok(Self {
            path,
            file,
            state: LogState::Empty,
            entries: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Append one entry; the serialized entry and its separator go out in one write
    pub fn append(&mut self, entry: &Value) -> Result<()> {
        if self.state == LogState::Closed {
            return Err(BqatError::aggregation(
                self.path.display().to_string(),
                "log already finalized",
            ));
        }

        let mut line = serde_json::to_vec(entry)?;
        line.push(b',');
        self.file
            .write_all(&line)
            .and_then(|_| self.file.flush())
            .map_err(|e| BqatError::aggregation(self.path.display().to_string(), e))?;

        self.state = LogState::HasEntries;
        self.entries += 1;
        Ok(())
    }

    /// Close the array. Calling it again is a no-op.
    pub fn finalize(&mut self) -> Result<()> {
        let closed = match self.state {
            LogState::Closed => return Ok(()),
            LogState::Empty => self.file.write_all(b"]"),
            LogState::HasEntries => self
                .file
                .seek(SeekFrom::End(-1))
                .and_then(|_| self.file.write_all(b"]")),
        };
        closed
            .and_then(|_| self.file.flush())
            .map_err(|e| BqatError::aggregation(self.path.display().to_string(), e))?;

        self.state = LogState::Closed;
        debug!(entries = self.entries, log = %self.path.display(), "Run log closed");
        Ok(())
    }
}

/// Close a log left open by an interrupted run.
///
/// Only the final byte is inspected: an opening bracket gains its closing
/// one, a trailing comma is replaced, and an already closed log is left
/// alone. An empty file becomes `[]`.
pub fn repair(path: &Path) -> Result<()> {
    let artifact = || path.display().to_string();
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| BqatError::aggregation(artifact(), e))?;

    let len = file.metadata()?.len();
    if len == 0 {
        file.write_all(b"[]")?;
        return Ok(());
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;

    match last[0] {
        b']' => Ok(()),
        b'[' => {
            file.seek(SeekFrom::End(0))?;
            file.write_all(b"]")?;
            Ok(())
        }
        b',' => {
            file.seek(SeekFrom::End(-1))?;
            file.write_all(b"]")?;
            Ok(())
        }
        other => Err(BqatError::aggregation(
            artifact(),
            format!("unexpected trailing byte {:?}", other as char),
        )),
    }
}

/// Read a closed log back as a list of entries
pub fn read_entries(path: &Path) -> Result<Vec<Value>> {
    let raw = std::fs::read(path)?;
    match serde_json::from_slice::<Value>(&raw)? {
        Value::Array(entries) => Ok(entries),
        _ => Err(BqatError::aggregation(
            path.display().to_string(),
            "log is not a JSON array",
        )),
    }
}
