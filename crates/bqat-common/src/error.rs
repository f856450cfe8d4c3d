//! Error types for BQAT

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for BQAT operations
pub type Result<T> = std::result::Result<T, BqatError>;

/// Main error type for BQAT
#[derive(Error, Debug)]
pub enum BqatError {
    /// The input root of a run does not exist. Fatal before dispatch.
    #[error("Input directory not found: {}", .0.display())]
    InputNotFound(PathBuf),

    /// Writing or finalizing one output artifact failed.
    #[error("Failed to write {artifact}: {reason}")]
    AggregationIo { artifact: String, reason: String },

    /// A filter or report was pointed at something that is not a CSV table.
    #[error("Not a valid CSV table: {}", .0.display())]
    FilterInputInvalid(PathBuf),

    #[error("Invalid predicate '{query}': {reason}")]
    InvalidPredicate { query: String, reason: String },

    /// A filter named a column the table does not have.
    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Unsupported modality: {0}")]
    UnsupportedModality(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl BqatError {
    /// Create an aggregation failure for the named artifact
    pub fn aggregation(artifact: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::AggregationIo {
            artifact: artifact.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid predicate error
    pub fn invalid_predicate(query: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::InvalidPredicate {
            query: query.into(),
            reason: reason.to_string(),
        }
    }
}
