//! Metrics recomputation
//!
//! The loader recomputes accuracy and precision from raw samples under several
//! filter policies. It only depends on the [`MetricsRecomputer`] trait; the
//! statistics themselves belong to the implementation.

mod angular;

pub use angular::AngularRecomputer;

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::stats::Reduction;
use crate::types::{MetricVariant, RawSessionRecord, SampleRecord, TargetResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Filter configuration for one recomputation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecomputeConfig {
    /// First sample index (per target) included
    pub start_sample: usize,
    /// Last sample index (per target) included
    pub end_sample: usize,
    /// Drop samples deviating from the target by more than this angle (degrees)
    pub outlier_threshold_deg: Option<f64>,
    /// Only include targets within these x/y half-angles (degrees)
    pub inner_field: Option<(f64, f64)>,
    /// Drop samples where either eye's data is missing
    pub skip_missing_eye: bool,
    /// Reduction across targets
    pub aggregation: Reduction,
}

impl RecomputeConfig {
    /// Unfiltered configuration over a sample window
    pub fn raw(start_sample: usize, end_sample: usize) -> Self {
        Self {
            start_sample,
            end_sample,
            outlier_threshold_deg: None,
            inner_field: None,
            skip_missing_eye: false,
            aggregation: Reduction::Mean,
        }
    }

    /// Configuration used for a loader variant
    pub fn for_variant(variant: MetricVariant, config: &AnalysisConfig) -> Self {
        let base = Self {
            aggregation: config.aggregation,
            ..Self::raw(config.sample_window.start, config.sample_window.end)
        };
        match variant {
            MetricVariant::Raw => base,
            MetricVariant::OutlierCorrected => Self {
                outlier_threshold_deg: Some(config.outlier_threshold_deg),
                ..base
            },
            MetricVariant::InnerField => Self {
                inner_field: Some((config.inner_field.x, config.inner_field.y)),
                ..base
            },
            MetricVariant::MonocularSkip => Self {
                outlier_threshold_deg: Some(config.outlier_threshold_deg),
                skip_missing_eye: true,
                ..base
            },
        }
    }

    pub fn includes_sample(&self, index: usize) -> bool {
        index >= self.start_sample && index <= self.end_sample
    }
}

/// Result of one recomputation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsResult {
    /// Named scalar metrics; keys without a defined value are absent
    pub results: BTreeMap<String, f64>,
    /// Samples that were considered, in target then sample order
    pub samples: Vec<SampleRecord>,
    /// One entry per included target
    pub targets: Vec<TargetResult>,
}

/// Recomputes validation metrics from a record's raw samples
pub trait MetricsRecomputer {
    fn recompute(
        &self,
        record: &RawSessionRecord,
        config: &RecomputeConfig,
    ) -> Result<MetricsResult, AnalysisError>;
}
