//! Run orchestration
//!
//! A run goes enumerate, dispatch, then finalize each artifact in turn: log,
//! table, report, filter. Only a missing input aborts the run. Every
//! post-processing step is isolated, so a failure there nulls its own
//! artifact in the summary and the remaining steps still happen.

use bqat_common::{artifact_timestamp, BqatError, Modality, Result};
use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::benchmark::{run_benchmark, BenchmarkRequest, BenchmarkSummary};
use crate::config::{BatchConfig, DEFAULT_OUTPUT_DIR, DEFAULT_PATTERN};
use crate::dataset::Dataset;
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::enumerator::PathEnumerator;
use crate::filter::{filter_table, FilterRequest};
use crate::metadata::{format_duration, version_string, wrap_log, RunMetadata};
use crate::progress::ProgressTracker;
use crate::report::{HtmlReportRenderer, ReportRenderer};
use crate::runtime::WorkerRuntime;
use crate::scan::{Conversion, DirectoryTask, ScanCollaborator, ScanGranularity};
use crate::sink::{repair, OutcomeSink};

/// What a run processes and where its artifacts go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub modality: Modality,
    pub input: PathBuf,
    pub output_dir: PathBuf,
    /// Filename glob without extension
    pub pattern: String,
    /// Requested extensions; empty means the modality defaults
    pub extensions: Vec<String>,
    /// Cap on files submitted; `None` or zero means no cap
    pub limit: Option<usize>,
    pub conversion: Conversion,
    /// Applied to the finished table when not empty
    pub filter: FilterRequest,
}

impl RunRequest {
    pub fn new(modality: Modality, input: impl Into<PathBuf>) -> Self {
        Self {
            modality,
            input: input.into(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            pattern: DEFAULT_PATTERN.to_string(),
            extensions: Vec::new(),
            limit: None,
            conversion: Conversion::default(),
            filter: FilterRequest::default(),
        }
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn conversion(mut self, conversion: Conversion) -> Self {
        self.conversion = conversion;
        self
    }

    pub fn filter(mut self, filter: FilterRequest) -> Self {
        self.filter = filter;
        self
    }
}

/// Artifact paths of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArtifacts {
    pub output: PathBuf,
    pub log: PathBuf,
    pub report: PathBuf,
}

impl RunArtifacts {
    pub fn new(output_dir: &Path, modality: Modality, stamp: &str) -> Self {
        Self {
            output: output_dir.join(format!("output_{modality}_{stamp}.csv")),
            log: output_dir.join(format!("log_{modality}_{stamp}.json")),
            report: output_dir.join(format!("report_{modality}_{stamp}.html")),
        }
    }
}

/// Final user-facing summary of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    #[serde(rename = "Total process time")]
    pub total_process_time: String,
    #[serde(rename = "System throughput")]
    pub system_throughput: String,
    #[serde(rename = "Assessment Task")]
    pub assessment_task: AssessmentTask,
    #[serde(rename = "Outlier Filter", skip_serializing_if = "Option::is_none")]
    pub outlier_filter: Option<OutlierFilter>,
    #[serde(skip)]
    pub dispatch: DispatchReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssessmentTask {
    #[serde(rename = "Processed")]
    pub processed: u64,
    #[serde(rename = "Failed")]
    pub failed: u64,
    #[serde(rename = "Input")]
    pub input: PathBuf,
    #[serde(rename = "Output")]
    pub output: Option<PathBuf>,
    #[serde(rename = "Report")]
    pub report: Option<PathBuf>,
    #[serde(rename = "Log")]
    pub log: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutlierFilter {
    #[serde(rename = "Output")]
    pub output: PathBuf,
    #[serde(rename = "Report")]
    pub report: PathBuf,
}

/// Throughput as shown in the summary
pub fn format_throughput(processed: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        processed as f64 / secs
    } else {
        0.0
    };
    format!("{rate:.2} item/s")
}

/// Executes batch runs with one collaborator and one worker runtime
pub struct BatchRun {
    config: BatchConfig,
    runtime: WorkerRuntime,
    collaborator: Arc<dyn ScanCollaborator>,
    renderer: Arc<dyn ReportRenderer>,
}

impl BatchRun {
    /// Build with a runtime chosen from `config` and the HTML renderer
    pub fn new(config: BatchConfig, collaborator: Arc<dyn ScanCollaborator>) -> Result<Self> {
        config.validate()?;
        let runtime = WorkerRuntime::from_config(&config)?;
        let link_root = std::env::current_dir()?;
        Ok(Self {
            config,
            runtime,
            collaborator,
            renderer: Arc::new(HtmlReportRenderer::new(link_root)),
        })
    }

    pub fn with_runtime(mut self, runtime: WorkerRuntime) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ReportRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn execute(&self, request: &RunRequest) -> Result<RunSummary> {
        let timer = Instant::now();
        let started = Local::now();

        let extensions = request.modality.resolve_extensions(&request.extensions);
        let enumerator = PathEnumerator::new(&request.input, &request.pattern, &extensions)?;
        let granularity = self.collaborator.granularity();

        let natural = enumerator.count() as u64;
        let total = match request.limit {
            Some(limit) if limit > 0 => natural.min(limit as u64),
            _ => natural,
        };
        info!(
            input = %enumerator.root().display(),
            modality = %request.modality,
            found = natural,
            total,
            "Starting batch run"
        );

        if total == 0 {
            warn!(input = %enumerator.root().display(), "No matching files, nothing to do");
            return Ok(RunSummary {
                total_process_time: format_duration(timer.elapsed()),
                system_throughput: format_throughput(0, timer.elapsed()),
                assessment_task: AssessmentTask {
                    processed: 0,
                    failed: 0,
                    input: enumerator.root().to_path_buf(),
                    output: None,
                    report: None,
                    log: None,
                },
                outlier_filter: None,
                dispatch: DispatchReport::default(),
            });
        }

        let artifacts = RunArtifacts::new(
            &request.output_dir,
            request.modality,
            &artifact_timestamp(&started),
        );
        let sink = Arc::new(OutcomeSink::create(&artifacts.output, &artifacts.log)?);

        let progress = if self.config.show_progress {
            ProgressTracker::visible(total)
        } else {
            ProgressTracker::hidden(total)
        };
        let dispatcher = Dispatcher::new(
            &self.runtime,
            Arc::clone(&self.collaborator),
            sink.clone(),
            progress,
        )
        .with_eta_step(self.config.eta_step)
        .with_poll_interval(self.config.poll_interval);

        let dispatch = match granularity {
            ScanGranularity::PerFile => dispatcher.dispatch_files(enumerator.tasks(
                request.modality,
                &request.conversion,
                request.limit,
            )),
            ScanGranularity::PerDirectory => dispatcher.dispatch_directories(
                enumerator.qualifying_directories(request.modality, request.limit),
                total,
            ),
            ScanGranularity::WholeRun => dispatcher.dispatch_directories(
                vec![DirectoryTask {
                    dir: enumerator.root().to_path_buf(),
                    modality: request.modality,
                    file_count: total,
                }],
                total,
            ),
        };
        drop(dispatcher);
        let elapsed = timer.elapsed();

        let sink = Arc::try_unwrap(sink).map_err(|_| {
            BqatError::aggregation(artifacts.output.display().to_string(), "sink still in use")
        })?;
        let (table, mut log) = sink.into_parts();

        // log
        let metadata = RunMetadata::new(&started, enumerator.root(), dispatch.processed, elapsed);
        let failed = match log.finalize().and_then(|_| wrap_log(&artifacts.log, metadata)) {
            Ok(metadata) => metadata.failed,
            Err(e) => {
                error!(log = %artifacts.log.display(), "Failed to finalize log: {}", e);
                if let Err(e) = repair(&artifacts.log) {
                    error!(log = %artifacts.log.display(), "Failed to repair log: {}", e);
                }
                0
            }
        };
        let log_path = artifacts.log.exists().then(|| artifacts.log.clone());

        // table
        let output = match table.finalize() {
            Ok(Some(path)) => Some(path),
            Ok(None) => {
                warn!("No results were tabulated");
                None
            }
            Err(e) => {
                error!(output = %artifacts.output.display(), "Failed to seam output: {}", e);
                None
            }
        };

        // report
        let report = match output {
            Some(ref csv) if self.config.reporting => {
                match self.render_run_report(csv, &artifacts.report) {
                    Ok(()) => Some(artifacts.report.clone()),
                    Err(e) => {
                        error!(report = %artifacts.report.display(), "Failed to generate report: {}", e);
                        None
                    }
                }
            }
            _ => None,
        };

        // filter
        let outlier_filter = match output {
            Some(ref csv) if !request.filter.is_empty() => {
                match filter_table(csv, &request.filter, self.renderer.as_ref()) {
                    Ok(Some(filtered)) => Some(OutlierFilter {
                        output: filtered.output,
                        report: filtered.report,
                    }),
                    Ok(None) => None,
                    Err(e) => {
                        error!("Failed to apply filter: {}", e);
                        None
                    }
                }
            }
            _ => None,
        };

        let summary = RunSummary {
            total_process_time: format_duration(elapsed),
            system_throughput: format_throughput(dispatch.processed, elapsed),
            assessment_task: AssessmentTask {
                processed: dispatch.processed,
                failed,
                input: enumerator.root().to_path_buf(),
                output,
                report,
                log: log_path,
            },
            outlier_filter,
            dispatch,
        };

        info!(
            processed = summary.assessment_task.processed,
            failed = summary.assessment_task.failed,
            elapsed = %summary.total_process_time,
            "Batch run finished"
        );
        Ok(summary)
    }

    /// Time the dispatch path on a replicated sample set; writes no artifacts
    pub fn benchmark(&self, request: &BenchmarkRequest) -> Result<BenchmarkSummary> {
        run_benchmark(
            &self.config,
            &self.runtime,
            Arc::clone(&self.collaborator),
            request,
        )
    }

    fn render_run_report(&self, csv: &Path, out: &Path) -> Result<()> {
        let data = Dataset::read(csv)?;
        self.renderer
            .render_report(&data, &format!("EDA Report ({})", version_string()), out)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::scan::{ScanError, ScanRecord, ScanTask};
    use serde_json::json;
    use tempfile::TempDir;

    struct Echo;

    impl ScanCollaborator for Echo {
        fn scan(&self, task: &ScanTask) -> std::result::Result<ScanRecord, ScanError> {
            Ok(json!({"file": task.path.display().to_string(), "ok": true})
                .as_object()
                .cloned()
                .unwrap())
        }
    }

    fn batch() -> BatchRun {
        BatchRun::new(BatchConfig::single(), Arc::new(Echo)).unwrap()
    }

    #[test]
    fn test_missing_input_is_fatal() {
        let dir = TempDir::new().unwrap();
        let request = RunRequest::new(Modality::Face, dir.path().join("missing"))
            .output_dir(dir.path().join("out"));
        assert!(matches!(
            batch().execute(&request),
            Err(BqatError::InputNotFound(_))
        ));
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_empty_input_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in");
        std::fs::create_dir_all(&input).unwrap();
        let request = RunRequest::new(Modality::Face, &input).output_dir(dir.path().join("out"));

        let summary = batch().execute(&request).unwrap();
        assert_eq!(summary.assessment_task.processed, 0);
        assert!(summary.assessment_task.output.is_none());
        assert!(summary.assessment_task.log.is_none());
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_artifact_names() {
        let artifacts = RunArtifacts::new(Path::new("out"), Modality::Iris, "1-2-2024_3-4-5");
        assert_eq!(artifacts.output, Path::new("out/output_iris_1-2-2024_3-4-5.csv"));
        assert_eq!(artifacts.log, Path::new("out/log_iris_1-2-2024_3-4-5.json"));
        assert_eq!(artifacts.report, Path::new("out/report_iris_1-2-2024_3-4-5.html"));
    }

    #[test]
    fn test_summary_serialization() {
        let summary = RunSummary {
            total_process_time: "0h0m1s".into(),
            system_throughput: format_throughput(3, Duration::from_secs(2)),
            assessment_task: AssessmentTask {
                processed: 3,
                failed: 1,
                input: PathBuf::from("/in"),
                output: None,
                report: None,
                log: Some(PathBuf::from("/out/log.json")),
            },
            outlier_filter: None,
            dispatch: DispatchReport::default(),
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["System throughput"], "1.50 item/s");
        assert_eq!(value["Assessment Task"]["Output"], serde_json::Value::Null);
        assert_eq!(value["Assessment Task"]["Failed"], 1);
        assert!(value.get("Outlier Filter").is_none());
    }
}
