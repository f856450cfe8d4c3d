//! End-to-end tests for the bqat-batch binary
//!
//! These tests validate:
//! - Help and argument validation
//! - Fatal input errors and the exit code
//! - Per-file and whole-run scanner programs
//! - The filter, report and benchmark subcommands

#![allow(clippy::unwrap_used, clippy::expect_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn bqat() -> Command {
    let mut cmd = Command::cargo_bin("bqat-batch").unwrap();
    cmd.env("BQAT_LOG_LEVEL", "warn");
    cmd
}

/// Helper to create a finished output table
fn create_table(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("output_face_1-1-2024_0-0-0.csv");
    fs::write(
        &path,
        "file,sharpness,face_detected\n\
         /data/a.png,55.5,True\n\
         /data/b.png,12,False\n\
         /data/c.png,71,True\n",
    )
    .expect("Failed to create test table");
    path
}

// ============================================================================
// Argument handling
// ============================================================================

#[test]
fn test_help() {
    bqat()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("filter"))
        .stdout(predicate::str::contains("report"))
        .stdout(predicate::str::contains("benchmark"));
}

#[test]
fn test_run_requires_mode() {
    bqat()
        .args(["run", "--input", "data"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--mode"));
}

#[test]
fn test_run_rejects_unknown_modality() {
    bqat()
        .args(["run", "--mode", "palm", "--input", "data"])
        .assert()
        .failure();
}

#[test]
fn test_run_missing_input_fails() {
    let dir = TempDir::new().unwrap();
    bqat()
        .args(["run", "--mode", "face", "--input"])
        .arg(dir.path().join("missing"))
        .arg("--output")
        .arg(dir.path().join("out"))
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("missing"));

    assert!(!dir.path().join("out").exists());
}

#[cfg(unix)]
#[test]
fn test_run_with_scanner_program() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("a.png"), b"img").unwrap();
    fs::write(input.join("b.png"), b"img").unwrap();

    let scanner = dir.path().join("scan.sh");
    fs::write(
        &scanner,
        "#!/bin/sh\necho \"{\\\"file\\\": \\\"$4\\\", \\\"quality\\\": 1}\"\n",
    )
    .unwrap();
    fs::set_permissions(&scanner, fs::Permissions::from_mode(0o755)).unwrap();

    let output = dir.path().join("out");
    bqat()
        .args(["run", "-m", "face", "--single", "-i"])
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .arg("--scanner")
        .arg(&scanner)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"Processed\": 2"))
        .stdout(predicate::str::contains("\"Failed\": 0"));

    let tables: Vec<_> = fs::read_dir(&output)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with("output_face_") && name.ends_with(".csv"))
        .collect();
    assert_eq!(tables.len(), 1);
}

#[cfg(unix)]
fn scanner_script(dir: &TempDir, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.path().join("scan.sh");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(unix)]
#[test]
fn test_run_whole_input_granularity() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input");
    fs::create_dir_all(input.join("nested")).unwrap();
    fs::write(input.join("a.png"), b"img").unwrap();
    fs::write(input.join("nested/b.png"), b"img").unwrap();

    let scanner = scanner_script(
        &dir,
        r#"[ "$5" = "--type" ] || exit 4
echo '{"results": [{"file": "a.png", "q": 1}, {"file": "nested/b.png", "q": 2}]}'"#,
    );

    let output = dir.path().join("out");
    bqat()
        .args(["run", "-m", "face", "--granularity", "run", "--reporting", "false", "-i"])
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .arg("--scanner")
        .arg(&scanner)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"Processed\": 2"))
        .stdout(predicate::str::contains("\"Report\": null"));
}

#[cfg(unix)]
#[test]
fn test_benchmark_writes_no_artifacts() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("samples");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("a.png"), b"img").unwrap();
    fs::write(input.join("b.png"), b"img").unwrap();

    let scanner = scanner_script(&dir, r#"echo '{"quality": 1}'"#);

    bqat()
        .current_dir(dir.path())
        .args(["benchmark", "-m", "face", "--replicas", "3", "-w", "2", "-i"])
        .arg(&input)
        .arg("--scanner")
        .arg(&scanner)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"File Processed\": 6"))
        .stdout(predicate::str::contains("file/sec"))
        .stdout(predicate::str::contains("System Info"));

    let mut entries: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    entries.sort();
    assert_eq!(entries, vec!["samples", "scan.sh"]);
}

// ============================================================================
// Filter
// ============================================================================

#[test]
fn test_filter_table() {
    let dir = TempDir::new().unwrap();
    let table = create_table(&dir);

    bqat()
        .args(["filter", "--input"])
        .arg(&table)
        .args(["--query", "sharpness > 50 & face_detected == True"])
        .args(["--sort", "sharpness"])
        .arg("--cwd")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Output Filter"))
        .stdout(predicate::str::contains("filtered_output_"));

    let outputs: Vec<PathBuf> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| {
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("filtered_output_")
        })
        .collect();
    assert_eq!(outputs.len(), 1);
    let content = fs::read_to_string(&outputs[0]).unwrap();
    assert_eq!(
        content,
        "file,sharpness,face_detected\n/data/a.png,55.5,True\n/data/c.png,71,True\n"
    );
}

#[test]
fn test_filter_rejects_non_csv_input() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("table.txt");
    fs::write(&input, "file\n").unwrap();

    bqat()
        .args(["filter", "--query", "x > 1", "--input"])
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not a valid CSV table"));
}

#[test]
fn test_filter_invalid_query() {
    let dir = TempDir::new().unwrap();
    let table = create_table(&dir);

    bqat()
        .args(["filter", "--query", "sharpness >", "--input"])
        .arg(&table)
        .assert()
        .failure();
}

#[test]
fn test_filter_without_matches_prints_nothing() {
    let dir = TempDir::new().unwrap();
    let table = create_table(&dir);

    bqat()
        .args(["filter", "--query", "sharpness > 1000", "--input"])
        .arg(&table)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

// ============================================================================
// Report
// ============================================================================

#[test]
fn test_report_table() {
    let dir = TempDir::new().unwrap();
    let table = create_table(&dir);

    bqat()
        .args(["report", "--input"])
        .arg(&table)
        .assert()
        .success()
        .stdout(predicate::str::contains("EDA Report"))
        .stdout(predicate::str::contains("eda_report_"));

    let reports: Vec<PathBuf> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| {
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("eda_report_")
        })
        .collect();
    assert_eq!(reports.len(), 1);
    assert!(fs::read_to_string(&reports[0])
        .unwrap()
        .starts_with("<!doctype html>"));
}
