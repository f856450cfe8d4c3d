//! Batch configuration
//!
//! Execution settings for a run, separate from what the run processes (see
//! [`crate::run::RunRequest`]).

use bqat_common::{BqatError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Batch Configuration Constants
// ============================================================================

/// Completions to wait for before the progress bar is advanced.
pub const DEFAULT_ETA_STEP: usize = 10;

/// Seconds between progress polls while waiting on workers.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 3;

/// Lines an external engine writes to its counter file per finished item.
pub const DEFAULT_COUNTER_LINES_PER_ITEM: u64 = 34;

/// Output directory when the request does not name one.
pub const DEFAULT_OUTPUT_DIR: &str = "data/output/";

/// Filename glob when the request does not name one.
pub const DEFAULT_PATTERN: &str = "*";

/// Settings for how a batch is executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Worker threads in pool mode
    pub workers: usize,

    /// Run every task inline on the calling thread
    #[serde(default)]
    pub single: bool,

    pub eta_step: usize,

    pub poll_interval: Duration,

    pub counter_lines_per_item: u64,

    /// Render the summary report after the run
    #[serde(default = "default_reporting")]
    pub reporting: bool,

    /// Draw progress bars on the terminal
    #[serde(default)]
    pub show_progress: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            single: false,
            eta_step: DEFAULT_ETA_STEP,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            counter_lines_per_item: DEFAULT_COUNTER_LINES_PER_ITEM,
            reporting: true,
            show_progress: false,
        }
    }
}

fn default_reporting() -> bool {
    true
}

/// One worker per available core, at least one
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl BatchConfig {
    /// Overlay `BQAT_*` environment variables on the defaults.
    ///
    /// Recognised: `BQAT_WORKERS`, `BQAT_SINGLE`, `BQAT_ETA_STEP`,
    /// `BQAT_POLL_INTERVAL_SECS`, `BQAT_COUNTER_LINES_PER_ITEM`,
    /// `BQAT_REPORTING`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(workers) = env_parse::<usize>("BQAT_WORKERS")? {
            config.workers = workers;
        }
        if let Some(single) = env_parse::<bool>("BQAT_SINGLE")? {
            config.single = single;
        }
        if let Some(step) = env_parse::<usize>("BQAT_ETA_STEP")? {
            config.eta_step = step;
        }
        if let Some(secs) = env_parse::<u64>("BQAT_POLL_INTERVAL_SECS")? {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(lines) = env_parse::<u64>("BQAT_COUNTER_LINES_PER_ITEM")? {
            config.counter_lines_per_item = lines;
        }
        if let Some(reporting) = env_parse::<bool>("BQAT_REPORTING")? {
            config.reporting = reporting;
        }

        config.validate()?;
        Ok(config)
    }

    /// Settings for an inline run
    pub fn single() -> Self {
        Self {
            single: true,
            workers: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(BqatError::config("workers must be at least 1"));
        }
        if self.eta_step == 0 {
            return Err(BqatError::config("eta step must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(BqatError::config("poll interval must be non-zero"));
        }
        if self.counter_lines_per_item == 0 {
            return Err(BqatError::config("counter lines per item must be at least 1"));
        }
        Ok(())
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| BqatError::config(format!("{key}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = BatchConfig::default();
        assert!(config.workers >= 1);
        assert!(!config.single);
        assert_eq!(config.eta_step, DEFAULT_ETA_STEP);
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert!(config.reporting);
        assert!(BatchConfig::single().reporting);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reporting_defaults_on_when_deserialized() {
        let config: BatchConfig = serde_json::from_str(
            r#"{"workers": 2, "eta_step": 10,
                "poll_interval": {"secs": 3, "nanos": 0},
                "counter_lines_per_item": 34}"#,
        )
        .unwrap();
        assert!(config.reporting);
        assert!(!config.single);
    }

    #[test]
    fn test_validate_rejects_zero() {
        let config = BatchConfig {
            eta_step: 0,
            ..BatchConfig::default()
        };
        assert!(matches!(config.validate(), Err(BqatError::Config(_))));

        let config = BatchConfig {
            workers: 0,
            ..BatchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("BQAT_WORKERS", "3");
        std::env::set_var("BQAT_SINGLE", "true");
        let config = BatchConfig::from_env();
        std::env::remove_var("BQAT_WORKERS");
        std::env::remove_var("BQAT_SINGLE");

        let config = config.unwrap();
        assert_eq!(config.workers, 3);
        assert!(config.single);
    }

    #[test]
    fn test_single() {
        let config = BatchConfig::single();
        assert!(config.single);
        assert_eq!(config.workers, 1);
    }
}
