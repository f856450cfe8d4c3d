//! BQAT Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging bootstrap and error handling for the BQAT batch tools.
//!
//! # Overview
//!
//! - **Error Handling**: [`BqatError`] and the [`Result`] alias
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]
//! - **Types**: biometric [`Modality`] and artifact naming helpers
//!
//! # Example
//!
//! ```no_run
//! use bqat_common::{Modality, Result};
//!
//! fn extensions(mode: &str) -> Result<Vec<String>> {
//!     let modality: Modality = mode.parse()?;
//!     Ok(modality.default_extensions())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{BqatError, Result};
pub use types::{artifact_timestamp, Modality};
