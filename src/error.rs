//! Error types for gazeval

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while importing, binning or aggregating validation data.
///
/// Every variant is fatal to the batch that raised it.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Failed to parse record file {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("Record file {} is missing required metadata field '{field}'", path.display())]
    MissingField { path: PathBuf, field: &'static str },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Matrix {val_id} does not match the other matrices: {details}")]
    Consistency { val_id: String, details: String },

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalysisError {
    /// True for errors caused by an unreadable or incomplete record file.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            AnalysisError::Parse { .. } | AnalysisError::MissingField { .. }
        )
    }
}
