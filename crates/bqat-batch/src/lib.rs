//! BQAT Batch Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Orchestration core for biometric quality assessment runs.
//!
//! # Overview
//!
//! - **Discovery**: [`enumerator::PathEnumerator`] finds sample files
//! - **Dispatch**: [`dispatcher::Dispatcher`] fans scans out over a
//!   [`runtime::WorkerRuntime`] and tracks progress
//! - **Aggregation**: [`sink::OutcomeSink`] streams results into a CSV table
//!   with a late-bound header and into a JSON run log
//! - **Post-processing**: run metadata, reports and [`filter`]
//! - **Benchmark**: [`benchmark`] times the dispatch path on a replicated
//!   sample set
//!
//! The assessment itself is an opaque [`scan::ScanCollaborator`].
//!
//! # Example
//!
//! ```no_run
//! use bqat_batch::{BatchConfig, BatchRun, CommandScanner, RunRequest};
//! use bqat_common::Modality;
//! use std::sync::Arc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let scanner = Arc::new(CommandScanner::new("bqat-scan"));
//!     let run = BatchRun::new(BatchConfig::default(), scanner)?;
//!     let request = RunRequest::new(Modality::Face, "data/face").output_dir("data/output");
//!     let summary = run.execute(&request)?;
//!     println!("{}", serde_json::to_string_pretty(&summary)?);
//!     Ok(())
//! }
//! ```

pub mod benchmark;
pub mod cli;
pub mod command;
pub mod config;
pub mod dataset;
pub mod dispatcher;
pub mod enumerator;
pub mod filter;
pub mod metadata;
pub mod progress;
pub mod report;
pub mod run;
pub mod runtime;
pub mod scan;
pub mod sink;

// Re-export commonly used types
pub use benchmark::{BenchmarkRequest, BenchmarkSummary};
pub use cli::Cli;
pub use command::CommandScanner;
pub use config::BatchConfig;
pub use filter::{filter_table, FilterRequest};
pub use report::{generate_report, HtmlReportRenderer, ReportRenderer};
pub use run::{BatchRun, RunRequest, RunSummary};
pub use runtime::WorkerRuntime;
pub use scan::{ScanCollaborator, ScanGranularity, ScanOutcome, ScanRecord, ScanTask};
