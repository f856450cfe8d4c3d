//! Run metadata
//!
//! Once the log array is closed it is wrapped together with a metadata block
//! describing the run. The failed count is derived from the log itself, so
//! the two can never disagree.

use bqat_common::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sink::{is_truthy, read_entries, LOAD_IMAGE_KEY, TASK_ERROR_KEY};

/// Version string stamped on every artifact
pub fn version_string() -> String {
    format!("BQAT v{}", env!("CARGO_PKG_VERSION"))
}

/// Metadata block of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub version: String,
    pub datetime: String,
    #[serde(rename = "input directory")]
    pub input_directory: PathBuf,
    pub processed: u64,
    pub failed: u64,
    /// Number of log entries
    pub log: usize,
    #[serde(rename = "process time")]
    pub process_time: String,
}

impl RunMetadata {
    pub fn new(
        started: &DateTime<Local>,
        input_directory: &Path,
        processed: u64,
        elapsed: Duration,
    ) -> Self {
        Self {
            version: version_string(),
            datetime: started.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
            input_directory: input_directory.to_path_buf(),
            processed,
            failed: 0,
            log: 0,
            process_time: format_duration(elapsed),
        }
    }
}

/// `0h1m5s` style duration, whole seconds
pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Items the log records as failed.
///
/// A failed directory counts for every file it held; an undecodable sample or
/// a failed task counts once.
pub fn count_failures(entries: &[Value]) -> u64 {
    entries
        .iter()
        .filter_map(Value::as_object)
        .map(|entry| {
            if entry.contains_key("error") {
                if let Some(count) = entry.get("file count").and_then(Value::as_u64) {
                    return count;
                }
            }
            let flagged = |key: &str| entry.get(key).is_some_and(is_truthy);
            if flagged(LOAD_IMAGE_KEY) || flagged(TASK_ERROR_KEY) {
                1
            } else {
                0
            }
        })
        .sum()
}

/// Rewrite a closed log as `{"metadata": ..., "log": [...]}`.
///
/// The `failed` and `log` fields of `metadata` are taken from the entries.
pub fn wrap_log(path: &Path, mut metadata: RunMetadata) -> Result<RunMetadata> {
    let entries = read_entries(path)?;
    metadata.failed = count_failures(&entries);
    metadata.log = entries.len();

    let document = json!({
        "metadata": metadata,
        "log": entries,
    });
    let staged = path.with_extension("json.wrap");
    std::fs::write(&staged, serde_json::to_vec_pretty(&document)?)?;
    std::fs::rename(&staged, path)?;

    Ok(metadata)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_count_failures() {
        let entries = vec![
            json!({"file": "a.png", "load image": "corrupt"}),
            json!({"file": "b.png", "task error": "timeout"}),
            json!({"file": "c.png", "face detection": "none"}),
            json!({"directory": "/d", "file count": 5, "error": "crashed"}),
            json!({"convert": "png", "file": "e.jp2"}),
        ];
        assert_eq!(count_failures(&entries), 7);
    }

    #[test]
    fn test_false_flags_are_not_failures() {
        let entries = vec![
            json!({"file": "a.png", "load image": false}),
            json!({"file": "b.png", "task error": null}),
            json!({"file": "c.png", "load image": ""}),
            json!({"file": "d.png", "load image": "truncated"}),
        ];
        assert_eq!(count_failures(&entries), 1);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(400)), "0h0m0s");
        assert_eq!(format_duration(Duration::from_secs(75)), "0h1m15s");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h2m3s");
    }

    #[test]
    fn test_wrap_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");
        std::fs::write(&path, r#"[{"file":"a.png","task error":"x"}]"#).unwrap();

        let started = Local::now();
        let metadata = RunMetadata::new(
            &started,
            Path::new("/data/face"),
            3,
            Duration::from_secs(2),
        );
        let metadata = wrap_log(&path, metadata).unwrap();
        assert_eq!(metadata.failed, 1);

        let doc: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(doc["metadata"]["processed"], 3);
        assert_eq!(doc["metadata"]["failed"], 1);
        assert_eq!(doc["metadata"]["input directory"], "/data/face");
        assert_eq!(doc["metadata"]["log"], 1);
        assert_eq!(doc["metadata"]["process time"], "0h0m2s");
        assert!(doc["metadata"]["version"]
            .as_str()
            .unwrap()
            .starts_with("BQAT v"));
        assert_eq!(doc["log"][0]["file"], "a.png");
    }
}
