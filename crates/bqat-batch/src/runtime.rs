//! Worker runtime
//!
//! A run either executes every task inline on the calling thread, or hands
//! tasks to a pool of blocking worker threads owned by a tokio runtime. The
//! runtime is an explicit value passed into the dispatcher, so tests can pick
//! inline execution without touching process-wide state.

use bqat_common::{BqatError, Result};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use crate::config::BatchConfig;

/// Where scan tasks run
#[derive(Debug)]
pub enum WorkerRuntime {
    /// Sequentially, on the caller's thread
    Inline,
    /// On up to `workers` blocking threads
    Pool { runtime: Runtime, workers: usize },
}

impl WorkerRuntime {
    pub fn inline() -> Self {
        WorkerRuntime::Inline
    }

    /// Pool of `workers` blocking threads
    pub fn pool(workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(workers)
            .thread_name("bqat-worker")
            .enable_all()
            .build()
            .map_err(|e| BqatError::config(format!("Failed to start worker pool: {e}")))?;

        debug!(workers, "Worker pool started");
        Ok(WorkerRuntime::Pool { runtime, workers })
    }

    pub fn from_config(config: &BatchConfig) -> Result<Self> {
        if config.single {
            Ok(Self::inline())
        } else {
            Self::pool(config.workers)
        }
    }

    /// Parallelism of this runtime
    pub fn workers(&self) -> usize {
        match self {
            WorkerRuntime::Inline => 1,
            WorkerRuntime::Pool { workers, .. } => *workers,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, WorkerRuntime::Inline)
    }

    /// The tokio runtime behind a pool, `None` when inline
    pub(crate) fn tokio(&self) -> Option<&Runtime> {
        match self {
            WorkerRuntime::Inline => None,
            WorkerRuntime::Pool { runtime, .. } => Some(runtime),
        }
    }
}
