//! Core types for the gazeval pipeline
//!
//! This module defines the data that flows through each stage: parsed session
//! records, the recomputation variants, and the rows of the three output
//! relations (session summary, target detail, sample detail).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Optional metadata fields copied into the session summary, in column order
pub const METADATA_FIELDS: [&str; 11] = [
    "engine",
    "eye_tracker",
    "prescriptionR",
    "gender",
    "age",
    "engine_version",
    "platform",
    "version",
    "prescriptionL",
    "datetime",
    "vision",
];

/// Scalar metric keys flattened into the session summary
pub const METRIC_KEYS: [&str; 35] = [
    "rmsi",
    "ipd",
    "rmsiX_R",
    "sd_R",
    "accX_R",
    "rmsi_R",
    "sdY_R",
    "accY",
    "accX",
    "sdY_L",
    "rmsi_L",
    "sdX_L",
    "sdX_R",
    "rmsiX",
    "rmsiY",
    "acc",
    "rmsiY_L",
    "rmsiX_L",
    "accY_L",
    "acc_L",
    "sdX",
    "sdY",
    "accX_L",
    "sd_L",
    "acc_R",
    "accY_R",
    "rmsiY_R",
    "sd",
    "start_sample",
    "end_sample",
    "repeated",
    "repeated_C",
    "repeated_L",
    "repeated_R",
    "repeated_any",
];

/// Column suffix marking values reported by the recording device itself
pub const RAW_SOURCE_SUFFIX: &str = "_raw-source";

/// Metadata block of a session record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub lab: String,
    pub participant_id: String,
    pub session: String,
    /// Recording timestamp exactly as written by the experiment runner
    pub datetime: String,
    pub engine: Option<Value>,
    pub engine_version: Option<Value>,
    pub platform: Option<Value>,
    pub eye_tracker: Option<Value>,
    pub age: Option<Value>,
    pub gender: Option<Value>,
    pub vision: Option<Value>,
    pub prescription_left: Option<Value>,
    pub prescription_right: Option<Value>,
    pub version: Option<Value>,
}

impl SessionMetadata {
    /// Look up one of [`METADATA_FIELDS`] by its column name.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "engine" => self.engine.clone(),
            "eye_tracker" => self.eye_tracker.clone(),
            "prescriptionR" => self.prescription_right.clone(),
            "gender" => self.gender.clone(),
            "age" => self.age.clone(),
            "engine_version" => self.engine_version.clone(),
            "platform" => self.platform.clone(),
            "version" => self.version.clone(),
            "prescriptionL" => self.prescription_left.clone(),
            "datetime" => Some(Value::String(self.datetime.clone())),
            "vision" => self.vision.clone(),
            _ => None,
        }
    }
}

/// One validation target as presented by the experiment runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// Horizontal position (degrees)
    pub x: f64,
    /// Vertical position (degrees)
    pub y: f64,
    /// Depth plane (meters)
    pub d: f64,
    /// Device-reported per-target fields, kept verbatim
    #[serde(flatten)]
    pub reported: BTreeMap<String, Value>,
}

/// One raw gaze sample, angles in degrees (azimuth, elevation)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GazeSample {
    #[serde(default)]
    pub frame: Option<u64>,
    #[serde(default)]
    pub time: Option<f64>,
    #[serde(default)]
    pub gaze_x: Option<f64>,
    #[serde(default)]
    pub gaze_y: Option<f64>,
    #[serde(default, rename = "gaze_x_L")]
    pub gaze_x_left: Option<f64>,
    #[serde(default, rename = "gaze_y_L")]
    pub gaze_y_left: Option<f64>,
    #[serde(default, rename = "gaze_x_R")]
    pub gaze_x_right: Option<f64>,
    #[serde(default, rename = "gaze_y_R")]
    pub gaze_y_right: Option<f64>,
    /// Interpupillary distance (mm)
    #[serde(default)]
    pub ipd: Option<f64>,
}

/// A parsed session record. Immutable once read.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSessionRecord {
    /// File the record was read from
    pub source: PathBuf,
    pub metadata: SessionMetadata,
    pub targets: Vec<TargetDescriptor>,
    /// Samples recorded while each target was shown, in target order
    pub samples: Vec<Vec<GazeSample>>,
    /// Device-reported summary metrics, restricted to [`METRIC_KEYS`]
    pub summary: BTreeMap<String, Value>,
}

/// Metric recomputation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricVariant {
    /// No exclusions
    Raw,
    /// Samples beyond the outlier threshold excluded
    OutlierCorrected,
    /// Only targets inside the inner field
    InnerField,
    /// Outlier-corrected, and samples missing either eye skipped
    MonocularSkip,
}

impl MetricVariant {
    /// All variants in the order they are computed
    pub const ALL: [MetricVariant; 4] = [
        MetricVariant::Raw,
        MetricVariant::OutlierCorrected,
        MetricVariant::InnerField,
        MetricVariant::MonocularSkip,
    ];

    /// Suffix appended to metric column names
    pub fn suffix(&self) -> &'static str {
        match self {
            MetricVariant::Raw => "",
            MetricVariant::OutlierCorrected => "_valid",
            MetricVariant::InnerField => "_i10",
            MetricVariant::MonocularSkip => "_nomonoc",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricVariant::Raw => "raw",
            MetricVariant::OutlierCorrected => "outlier_corrected",
            MetricVariant::InnerField => "inner_field",
            MetricVariant::MonocularSkip => "monocular_skip",
        }
    }
}

/// Per-sample output of a recomputation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub target_index: usize,
    /// Index of the sample within its target's recording
    pub sample_index: usize,
    pub tar_x: f64,
    pub tar_y: f64,
    pub tar_d: f64,
    pub frame: Option<u64>,
    pub time: Option<f64>,
    pub gaze_x: Option<f64>,
    pub gaze_y: Option<f64>,
    #[serde(rename = "gaze_x_L")]
    pub gaze_x_left: Option<f64>,
    #[serde(rename = "gaze_y_L")]
    pub gaze_y_left: Option<f64>,
    #[serde(rename = "gaze_x_R")]
    pub gaze_x_right: Option<f64>,
    #[serde(rename = "gaze_y_R")]
    pub gaze_y_right: Option<f64>,
    /// Angular offset from the target (degrees), combined gaze
    pub acc: Option<f64>,
    #[serde(rename = "acc_L")]
    pub acc_left: Option<f64>,
    #[serde(rename = "acc_R")]
    pub acc_right: Option<f64>,
}

/// Per-target output of a recomputation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetResult {
    pub target_index: usize,
    pub x: f64,
    pub y: f64,
    pub d: f64,
    /// Accuracy (degrees)
    pub acc: Option<f64>,
    /// Precision as standard deviation (degrees)
    pub sd: Option<f64>,
    /// Precision as RMS of successive differences (degrees)
    pub rmsi: Option<f64>,
    /// Number of repeated samples
    pub repeated: Option<f64>,
    /// Samples that contributed to this target
    pub n_samples: usize,
}

/// One row of the session-summary relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummaryRow {
    pub uid: String,
    pub session: String,
    pub val_id: String,
    /// Metadata and metric columns, keyed by column name
    #[serde(flatten)]
    pub columns: BTreeMap<String, Value>,
}

impl SessionSummaryRow {
    /// Numeric value of a column, if present
    pub fn metric(&self, column: &str) -> Option<f64> {
        self.columns.get(column).and_then(Value::as_f64)
    }
}

/// One row of the target-detail relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRow {
    pub uid: String,
    pub session: String,
    pub val_id: String,
    #[serde(flatten)]
    pub target: TargetResult,
}

/// One row of the sample-detail relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    pub uid: String,
    pub session: String,
    pub val_id: String,
    #[serde(flatten)]
    pub sample: SampleRecord,
}
