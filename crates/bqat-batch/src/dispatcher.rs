//! Work dispatcher
//!
//! Submits scan tasks to the worker runtime and routes every settled outcome
//! into the [`OutcomeSink`]. Per-item failures never leave this module: they
//! become log entries and dispatch carries on.
//!
//! Pool mode reports completions in batches of `eta_step`, each wait bounded
//! by `poll_interval`; once fewer than `eta_step` tasks remain every
//! completion is reported as it lands. Directory mode runs one blocking task
//! per directory and reads progress from a [`ProgressSource`] on every tick,
//! inline runs included.

use futures::stream::{self, StreamExt};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

use crate::progress::{ProgressSource, ProgressTracker, SettledWork};
use crate::runtime::WorkerRuntime;
use crate::scan::{run_directory_scan, run_scan, DirectoryTask, ScanCollaborator, ScanTask};
use crate::sink::OutcomeRecorder;

/// What a dispatch pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Tasks handed to the runtime
    pub submitted: u64,
    /// Tasks that settled, successfully or not
    pub completed: u64,
    /// Sample files accounted for
    pub processed: u64,
}

/// Fans scan tasks out over a [`WorkerRuntime`]
pub struct Dispatcher<'a> {
    runtime: &'a WorkerRuntime,
    collaborator: Arc<dyn ScanCollaborator>,
    sink: Arc<dyn OutcomeRecorder>,
    progress: ProgressTracker,
    eta_step: usize,
    poll_interval: Duration,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        runtime: &'a WorkerRuntime,
        collaborator: Arc<dyn ScanCollaborator>,
        sink: Arc<dyn OutcomeRecorder>,
        progress: ProgressTracker,
    ) -> Self {
        Self {
            runtime,
            collaborator,
            sink,
            progress,
            eta_step: crate::config::DEFAULT_ETA_STEP,
            poll_interval: Duration::from_secs(crate::config::DEFAULT_POLL_INTERVAL_SECS),
        }
    }

    pub fn with_eta_step(mut self, eta_step: usize) -> Self {
        self.eta_step = eta_step.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Run one task per file
    pub fn dispatch_files<I>(&self, tasks: I) -> DispatchReport
    where
        I: IntoIterator<Item = ScanTask>,
    {
        let report = match self.runtime.tokio() {
            Some(runtime) => runtime.block_on(self.drain_pool(tasks)),
            None => self.run_inline(tasks),
        };
        self.progress.finish();

        info!(
            submitted = report.submitted,
            completed = report.completed,
            "File dispatch finished"
        );
        report
    }

    fn run_inline<I>(&self, tasks: I) -> DispatchReport
    where
        I: IntoIterator<Item = ScanTask>,
    {
        let mut report = DispatchReport::default();
        for task in tasks {
            self.progress.mark_submitted(1);
            report.submitted += 1;

            let outcome = run_scan(self.collaborator.as_ref(), &task);
            self.sink.record(outcome);

            self.progress.mark_completed(1);
            report.completed += 1;
        }
        self.progress.submission_done();
        report.processed = report.submitted;
        report
    }

    async fn drain_pool<I>(&self, tasks: I) -> DispatchReport
    where
        I: IntoIterator<Item = ScanTask>,
    {
        let mut report = DispatchReport::default();
        let mut set: JoinSet<()> = JoinSet::new();

        for task in tasks {
            let collaborator = Arc::clone(&self.collaborator);
            let sink = Arc::clone(&self.sink);
            set.spawn_blocking(move || {
                let outcome = run_scan(collaborator.as_ref(), &task);
                sink.record(outcome);
            });
            self.progress.mark_submitted(1);
            report.submitted += 1;
        }
        self.progress.submission_done();
        debug!(tasks = report.submitted, "All tasks submitted");

        let eta_step = self.eta_step as u64;
        let mut pending = 0;
        loop {
            match tokio::time::timeout(self.poll_interval, set.join_next()).await {
                Ok(Some(joined)) => {
                    note_join(joined);
                    pending += 1;
                    if pending >= eta_step || set.len() < self.eta_step {
                        self.settle(&mut report, &mut pending);
                    }
                }
                Ok(None) => break,
                // partial batch, keep the bar moving
                Err(_) => self.settle(&mut report, &mut pending),
            }
        }
        self.settle(&mut report, &mut pending);

        report.processed = report.submitted;
        report
    }

    fn settle(&self, report: &mut DispatchReport, pending: &mut u64) {
        self.progress.mark_completed(*pending);
        report.completed += *pending;
        *pending = 0;
    }

    /// Run one task per directory
    ///
    /// `total` is the number of sample files the directories hold; progress
    /// is reported against it.
    pub fn dispatch_directories(&self, tasks: Vec<DirectoryTask>, total: u64) -> DispatchReport {
        let signal = self.collaborator.progress_signal();

        let report = match self.runtime.tokio() {
            Some(runtime) => {
                let settled = SettledWork::new();
                let source: Box<dyn ProgressSource> =
                    signal.unwrap_or_else(|| Box::new(settled.clone()));
                runtime.block_on(self.drain_directories(tasks, total, settled, source))
            }
            None => self.run_directories_inline(tasks, total, signal),
        };
        self.progress.advance_to(total);
        self.progress.finish();

        info!(
            directories = report.submitted,
            processed = report.processed,
            "Directory dispatch finished"
        );
        report
    }

    /// Scan directories on the calling thread.
    ///
    /// A collaborator signal is polled from a side thread while a scan is in
    /// flight; without one, progress moves as each directory settles.
    fn run_directories_inline(
        &self,
        tasks: Vec<DirectoryTask>,
        total: u64,
        signal: Option<Box<dyn ProgressSource>>,
    ) -> DispatchReport {
        let (stop, stopped) = mpsc::channel::<()>();

        std::thread::scope(|scope| {
            if let Some(mut source) = signal {
                let progress = &self.progress;
                let interval = self.poll_interval;
                scope.spawn(move || {
                    while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(interval) {
                        if let Some(done) = source.poll() {
                            progress.advance_to(done.min(total));
                        }
                    }
                });
            }

            let mut report = DispatchReport::default();
            for task in tasks {
                self.progress.mark_submitted(task.file_count);
                report.submitted += 1;

                report.processed += self.scan_directory(&task);
                report.completed += 1;
                self.progress.advance_to(report.processed.min(total));
            }
            self.progress.submission_done();
            drop(stop);
            report
        })
    }

    fn scan_directory(&self, task: &DirectoryTask) -> u64 {
        directory_task(self.collaborator.as_ref(), self.sink.as_ref(), task)
    }

    async fn drain_directories(
        &self,
        tasks: Vec<DirectoryTask>,
        total: u64,
        settled: SettledWork,
        mut source: Box<dyn ProgressSource>,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        for task in &tasks {
            self.progress.mark_submitted(task.file_count);
            report.submitted += 1;
        }
        self.progress.submission_done();

        let mut running = stream::iter(tasks)
            .map(|task| {
                let collaborator = Arc::clone(&self.collaborator);
                let sink = Arc::clone(&self.sink);
                let settled = settled.clone();
                tokio::task::spawn_blocking(move || {
                    let processed = directory_task(collaborator.as_ref(), sink.as_ref(), &task);
                    settled.add(processed);
                    processed
                })
            })
            .buffer_unordered(self.runtime.workers());

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                next = running.next() => match next {
                    Some(Ok(processed)) => {
                        report.processed += processed;
                        report.completed += 1;
                    }
                    Some(Err(e)) => {
                        error!("Directory worker failed: {}", e);
                        report.completed += 1;
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if let Some(done) = source.poll() {
                        self.progress.advance_to(done.min(total));
                    }
                }
            }
        }

        report
    }
}

/// Scan one directory and route the result; returns the files accounted for
fn directory_task(
    collaborator: &dyn ScanCollaborator,
    sink: &dyn OutcomeRecorder,
    task: &DirectoryTask,
) -> u64 {
    let result = run_directory_scan(collaborator, task);
    let processed = match result {
        Ok(ref scan) => scan.results.len() as u64,
        Err(_) => task.file_count,
    };
    sink.record_directory(task, result);
    processed
}

fn note_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!("Scan worker failed: {}", e);
    }
}
