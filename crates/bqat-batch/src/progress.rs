//! Progress tracking for batch runs
//!
//! [`ProgressTracker`] owns the `submitted` and `completed` counters and the
//! terminal bars that render them. [`ProgressSource`] is where completion
//! numbers come from when the dispatcher cannot count settled tasks itself.

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const BAR_TEMPLATE: &str =
    "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})";

/// Point-in-time view of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub total: u64,
    pub submitted: u64,
    pub completed: u64,
}

/// Shared, monotonically increasing counters
#[derive(Debug, Default)]
pub struct ProgressCounters {
    total: AtomicU64,
    submitted: AtomicU64,
    completed: AtomicU64,
}

impl ProgressCounters {
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::Acquire),
            submitted: self.submitted.load(Ordering::Acquire),
            completed: self.completed.load(Ordering::Acquire),
        }
    }
}

/// Counters plus their terminal rendering
#[derive(Clone)]
pub struct ProgressTracker {
    counters: Arc<ProgressCounters>,
    submit_bar: ProgressBar,
    process_bar: ProgressBar,
}

impl ProgressTracker {
    /// Tracker that draws bars on the terminal
    pub fn visible(total: u64) -> Self {
        Self::with_bars(
            total,
            create_progress_bar(total, "Sending tasks..."),
            create_progress_bar(total, "Processing..."),
        )
    }

    /// Tracker with counters only, for tests and non-interactive runs
    pub fn hidden(total: u64) -> Self {
        let bar = || {
            let pb = ProgressBar::hidden();
            pb.set_length(total);
            pb
        };
        Self::with_bars(total, bar(), bar())
    }

    fn with_bars(total: u64, submit_bar: ProgressBar, process_bar: ProgressBar) -> Self {
        let counters = Arc::new(ProgressCounters::default());
        counters.total.store(total, Ordering::Release);
        Self {
            counters,
            submit_bar,
            process_bar,
        }
    }

    /// Handle for observers that only need to read the numbers
    pub fn counters(&self) -> Arc<ProgressCounters> {
        Arc::clone(&self.counters)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.counters.snapshot()
    }

    pub fn mark_submitted(&self, n: u64) {
        let now = self.counters.submitted.fetch_add(n, Ordering::AcqRel) + n;
        self.submit_bar.set_position(now);
    }

    /// All tasks are queued
    pub fn submission_done(&self) {
        self.submit_bar.finish_and_clear();
    }

    pub fn mark_completed(&self, n: u64) {
        if n == 0 {
            return;
        }
        let now = self.counters.completed.fetch_add(n, Ordering::AcqRel) + n;
        self.process_bar.set_position(now);
    }

    /// Raise `completed` to `value`; never moves backwards
    pub fn advance_to(&self, value: u64) {
        let previous = self.counters.completed.fetch_max(value, Ordering::AcqRel);
        if value > previous {
            self.process_bar.set_position(value);
        }
    }

    pub fn finish(&self) {
        self.submit_bar.finish_and_clear();
        self.process_bar.finish_with_message("Finished!");
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("counters", &self.counters.snapshot())
            .finish_non_exhaustive()
    }
}

/// Create a progress bar with the standard batch template
pub fn create_progress_bar(total: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(message.to_string());
    pb
}

/// A place the dispatcher can ask "how many items are done?"
pub trait ProgressSource: Send {
    /// Items finished so far, or `None` while the signal is not available
    fn poll(&mut self) -> Option<u64>;
}

/// Counts work units as the dispatcher settles them
#[derive(Debug, Clone, Default)]
pub struct SettledWork {
    settled: Arc<AtomicU64>,
}

impl SettledWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `n` more finished items
    pub fn add(&self, n: u64) {
        self.settled.fetch_add(n, Ordering::AcqRel);
    }
}

impl ProgressSource for SettledWork {
    fn poll(&mut self) -> Option<u64> {
        Some(self.settled.load(Ordering::Acquire))
    }
}

/// Progress read from a log file an external process appends to.
///
/// Each finished item is assumed to add `lines_per_item` lines.
#[derive(Debug, Clone)]
pub struct CounterFile {
    path: PathBuf,
    lines_per_item: u64,
}

impl CounterFile {
    pub fn new(path: impl Into<PathBuf>, lines_per_item: u64) -> Self {
        Self {
            path: path.into(),
            lines_per_item: lines_per_item.max(1),
        }
    }
}

impl ProgressSource for CounterFile {
    fn poll(&mut self) -> Option<u64> {
        let file = std::fs::File::open(&self.path).ok()?;
        let lines = BufReader::new(file).lines().count() as u64;
        Some(lines / self.lines_per_item)
    }
}
