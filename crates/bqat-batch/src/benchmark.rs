//! Throughput benchmark
//!
//! Replicates a sample set and pushes it through the same dispatch path a run
//! uses. Outcomes are counted and dropped, so a benchmark leaves no artifacts
//! behind.

use bqat_common::{Modality, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::{BatchConfig, DEFAULT_PATTERN};
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::enumerator::PathEnumerator;
use crate::metadata::format_duration;
use crate::progress::ProgressTracker;
use crate::runtime::WorkerRuntime;
use crate::scan::{
    Conversion, DirectoryScan, DirectoryTask, ScanCollaborator, ScanError, ScanGranularity,
    ScanOutcome,
};
use crate::sink::{is_truthy, OutcomeRecorder, LOAD_IMAGE_KEY, LOG_KEY};

/// Copies of the sample set a pooled benchmark dispatches
pub const DEFAULT_REPLICAS: usize = 100;

/// What to benchmark with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkRequest {
    pub modality: Modality,
    /// Directory holding the sample set
    pub input: PathBuf,
    pub pattern: String,
    pub extensions: Vec<String>,
    /// Times the sample set is dispatched in pool mode; inline runs use one
    pub replicas: usize,
}

impl BenchmarkRequest {
    pub fn new(modality: Modality, input: impl Into<PathBuf>) -> Self {
        Self {
            modality,
            input: input.into(),
            pattern: DEFAULT_PATTERN.to_string(),
            extensions: Vec::new(),
            replicas: DEFAULT_REPLICAS,
        }
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }
}

/// Host the benchmark ran on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemInfo {
    pub hostname: String,
    pub os: String,
    pub arch: String,
    pub total_threads: usize,
    pub workers: usize,
}

impl SystemInfo {
    pub fn current(runtime: &WorkerRuntime) -> Self {
        Self {
            hostname: hostname::get()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            total_threads: crate::config::default_workers(),
            workers: runtime.workers(),
        }
    }
}

/// What a benchmark prints
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkSummary {
    #[serde(rename = "File Processed")]
    pub processed: u64,
    #[serde(rename = "Failed")]
    pub failed: u64,
    #[serde(rename = "Processing Time")]
    pub processing_time: String,
    #[serde(rename = "Throughput")]
    pub throughput: String,
    #[serde(rename = "System Info")]
    pub system: SystemInfo,
    #[serde(skip)]
    pub dispatch: DispatchReport,
}

/// `12.34 file/sec`
pub fn format_file_rate(processed: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        processed as f64 / secs
    } else {
        0.0
    };
    format!("{rate:.2} file/sec")
}

/// Counts failed items and drops everything else
#[derive(Debug, Default)]
pub struct DiscardSink {
    failed: AtomicU64,
}

impl DiscardSink {
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Acquire)
    }
}

impl OutcomeRecorder for DiscardSink {
    fn record(&self, outcome: ScanOutcome) {
        let failed = match outcome {
            ScanOutcome::Success { record, .. } => record
                .get(LOG_KEY)
                .and_then(Value::as_object)
                .and_then(|log| log.get(LOAD_IMAGE_KEY))
                .is_some_and(is_truthy),
            ScanOutcome::Failure { .. } => true,
        };
        if failed {
            self.failed.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn record_directory(
        &self,
        task: &DirectoryTask,
        result: std::result::Result<DirectoryScan, ScanError>,
    ) {
        if result.is_err() {
            self.failed.fetch_add(task.file_count, Ordering::AcqRel);
        }
    }
}

/// Dispatch `request.replicas` copies of the sample set and time it
pub fn run_benchmark(
    config: &BatchConfig,
    runtime: &WorkerRuntime,
    collaborator: Arc<dyn ScanCollaborator>,
    request: &BenchmarkRequest,
) -> Result<BenchmarkSummary> {
    let extensions = request.modality.resolve_extensions(&request.extensions);
    let enumerator = PathEnumerator::new(&request.input, &request.pattern, &extensions)?;
    let replicas = if runtime.is_inline() {
        1
    } else {
        request.replicas.max(1)
    };
    let granularity = collaborator.granularity();

    let samples = enumerator.count() as u64;
    let total = samples * replicas as u64;
    if samples == 0 {
        warn!(input = %enumerator.root().display(), "No samples to benchmark with");
    }
    info!(
        input = %enumerator.root().display(),
        modality = %request.modality,
        samples,
        replicas,
        workers = runtime.workers(),
        "Starting benchmark"
    );

    let sink = Arc::new(DiscardSink::default());
    let progress = if config.show_progress {
        ProgressTracker::visible(total)
    } else {
        ProgressTracker::hidden(total)
    };
    let dispatcher = Dispatcher::new(runtime, collaborator, sink.clone(), progress)
        .with_eta_step(config.eta_step)
        .with_poll_interval(config.poll_interval);

    let timer = Instant::now();
    let dispatch = match granularity {
        _ if samples == 0 => DispatchReport::default(),
        ScanGranularity::PerFile => {
            let tasks: Vec<_> = enumerator
                .tasks(request.modality, &Conversion::default(), None)
                .collect();
            dispatcher.dispatch_files((0..replicas).flat_map(|_| tasks.iter().cloned()))
        }
        ScanGranularity::PerDirectory => {
            let dirs = enumerator.qualifying_directories(request.modality, None);
            let repeated = (0..replicas).flat_map(|_| dirs.iter().cloned()).collect();
            dispatcher.dispatch_directories(repeated, total)
        }
        ScanGranularity::WholeRun => {
            let whole = DirectoryTask {
                dir: enumerator.root().to_path_buf(),
                modality: request.modality,
                file_count: samples,
            };
            dispatcher.dispatch_directories(vec![whole; replicas], total)
        }
    };
    let elapsed = timer.elapsed();
    drop(dispatcher);

    let summary = BenchmarkSummary {
        processed: dispatch.processed,
        failed: sink.failed(),
        processing_time: format_duration(elapsed),
        throughput: format_file_rate(dispatch.processed, elapsed),
        system: SystemInfo::current(runtime),
        dispatch,
    };
    info!(
        processed = summary.processed,
        throughput = %summary.throughput,
        "Benchmark finished"
    );
    Ok(summary)
}
