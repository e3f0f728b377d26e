//! Analysis configuration
//!
//! All settings have defaults matching the published validation protocol and
//! can be overridden from a JSON file. Missing keys fall back to the defaults.

use crate::binning::BinningConfig;
use crate::error::AnalysisError;
use crate::stats::Reduction;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default first sample index used for metric computation
pub const DEFAULT_START_SAMPLE: usize = 25;

/// Default last sample index used for metric computation
pub const DEFAULT_END_SAMPLE: usize = 115;

/// Default outlier exclusion threshold (degrees)
pub const DEFAULT_OUTLIER_THRESHOLD_DEG: f64 = 5.0;

/// Default inner-field half-angle (degrees)
pub const DEFAULT_INNER_FIELD_DEG: f64 = 10.0;

/// Environment variable the CLI reads the anonymization salt from
pub const SALT_ENV_VAR: &str = "GAZEVAL_SALT";

/// Inclusive per-target sample index window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleWindow {
    pub start: usize,
    pub end: usize,
}

impl Default for SampleWindow {
    fn default() -> Self {
        Self {
            start: DEFAULT_START_SAMPLE,
            end: DEFAULT_END_SAMPLE,
        }
    }
}

/// Half-angle bounds of the inner field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InnerField {
    pub x: f64,
    pub y: f64,
}

impl Default for InnerField {
    fn default() -> Self {
        Self {
            x: DEFAULT_INNER_FIELD_DEG,
            y: DEFAULT_INNER_FIELD_DEG,
        }
    }
}

/// Complete configuration of an analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Secret salt for participant/session hashing
    pub salt: String,
    pub sample_window: SampleWindow,
    pub outlier_threshold_deg: f64,
    pub inner_field: InnerField,
    /// Reduction across targets inside each recomputation
    pub aggregation: Reduction,
    pub binning: BinningConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            salt: String::new(),
            sample_window: SampleWindow::default(),
            outlier_threshold_deg: DEFAULT_OUTLIER_THRESHOLD_DEG,
            inner_field: InnerField::default(),
            aggregation: Reduction::Mean,
            binning: BinningConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Default configuration with the given salt
    pub fn with_salt(salt: impl Into<String>) -> Self {
        Self {
            salt: salt.into(),
            ..Self::default()
        }
    }

    /// Load configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, AnalysisError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load configuration from a JSON file
    pub fn from_path(path: &Path) -> Result<Self, AnalysisError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Save configuration to JSON. The salt is never written out.
    pub fn to_json(&self) -> Result<String, AnalysisError> {
        let redacted = Self {
            salt: String::new(),
            ..self.clone()
        };
        Ok(serde_json::to_string_pretty(&redacted)?)
    }

    /// Check that the configuration can drive an import.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.salt.is_empty() {
            return Err(AnalysisError::Configuration(format!(
                "anonymization salt is empty (set it in the config file or {SALT_ENV_VAR})"
            )));
        }
        if self.sample_window.start > self.sample_window.end {
            return Err(AnalysisError::Configuration(format!(
                "sample window {}..={} is empty",
                self.sample_window.start, self.sample_window.end
            )));
        }
        if !(self.outlier_threshold_deg.is_finite() && self.outlier_threshold_deg > 0.0) {
            return Err(AnalysisError::Configuration(format!(
                "outlier threshold must be a positive angle, got {}",
                self.outlier_threshold_deg
            )));
        }
        let field_ok = |v: f64| v.is_finite() && v >= 0.0;
        if !(field_ok(self.inner_field.x) && field_ok(self.inner_field.y)) {
            return Err(AnalysisError::Configuration(format!(
                "inner field bounds must be non-negative, got ({}, {})",
                self.inner_field.x, self.inner_field.y
            )));
        }
        self.binning.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::default();
        assert_eq!(config.sample_window, SampleWindow { start: 25, end: 115 });
        assert_eq!(config.outlier_threshold_deg, 5.0);
        assert_eq!(config.inner_field, InnerField { x: 10.0, y: 10.0 });
        assert_eq!(config.binning.grid, 5.0);
        assert_eq!(config.binning.x_range, Some((-15.0, 15.0)));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = AnalysisConfig::from_json(
            r#"{"salt": "s3cret", "sample_window": {"start": 0, "end": 50},
                "binning": {"grid": 2.5, "x_range": null}}"#,
        )
        .unwrap();
        assert_eq!(config.salt, "s3cret");
        assert_eq!(config.sample_window.end, 50);
        assert_eq!(config.outlier_threshold_deg, 5.0);
        assert_eq!(config.binning.grid, 2.5);
        assert_eq!(config.binning.x_range, None);
        assert_eq!(config.binning.y_range, Some((-15.0, 15.0)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(AnalysisConfig::default().validate().is_err());

        let mut config = AnalysisConfig::with_salt("s");
        assert!(config.validate().is_ok());

        config.sample_window = SampleWindow { start: 10, end: 5 };
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::with_salt("s");
        config.outlier_threshold_deg = 0.0;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::with_salt("s");
        config.binning.grid = -1.0;
        assert!(matches!(
            config.validate(),
            Err(AnalysisError::Configuration(_))
        ));
    }

    #[test]
    fn test_to_json_redacts_salt() {
        let config = AnalysisConfig::with_salt("do-not-leak");
        let json = config.to_json().unwrap();
        assert!(!json.contains("do-not-leak"));

        let back = AnalysisConfig::from_json(&json).unwrap();
        assert_eq!(back.sample_window, config.sample_window);
    }
}
