//! Session record files
//!
//! Discovers record files in one or more folders and parses them into
//! [`RawSessionRecord`]s. Required metadata is checked here so that every
//! later stage can rely on it.

use crate::error::AnalysisError;
use crate::types::{
    GazeSample, RawSessionRecord, SessionMetadata, TargetDescriptor, METRIC_KEYS,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// File extension of session record files
pub const RECORD_EXTENSION: &str = "json";

/// Collect record files found directly inside the given folders.
///
/// Files from all folders are pooled and sorted by path. Sub-folders are not
/// searched.
pub fn discover_record_files<P: AsRef<Path>>(folders: &[P]) -> Result<Vec<PathBuf>, AnalysisError> {
    let mut files = Vec::new();
    for folder in folders {
        let folder = folder.as_ref();
        for entry in WalkDir::new(folder).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                AnalysisError::Configuration(format!(
                    "cannot read folder {}: {}",
                    folder.display(),
                    e
                ))
            })?;
            let path = entry.path();
            let is_record = entry.file_type().is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(RECORD_EXTENSION));
            if is_record {
                files.push(path.to_path_buf());
            }
        }
        debug!(folder = %folder.display(), "scanned record folder");
    }
    files.sort();
    Ok(files)
}

/// Read and parse one record file.
pub fn read_record(path: &Path) -> Result<RawSessionRecord, AnalysisError> {
    let raw = fs::read_to_string(path).map_err(|e| AnalysisError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_record(&raw, path)
}

/// Parse record JSON. `path` is only used to name the record in errors.
pub fn parse_record(raw_json: &str, path: &Path) -> Result<RawSessionRecord, AnalysisError> {
    let file: RecordFile = serde_json::from_str(raw_json).map_err(|e| AnalysisError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let meta = file.metadata.ok_or_else(|| AnalysisError::Parse {
        path: path.to_path_buf(),
        reason: "missing 'metadata' block".to_string(),
    })?;

    let metadata = SessionMetadata {
        lab: required(&meta.lab, "lab", path)?,
        participant_id: required(&meta.part_id, "part_id", path)?,
        session: required(&meta.session, "session", path)?,
        datetime: required(&meta.datetime, "datetime", path)?,
        engine: meta.engine,
        engine_version: meta.engine_version,
        platform: meta.platform,
        eye_tracker: meta.eye_tracker,
        age: meta.age,
        gender: meta.gender,
        vision: meta.vision,
        prescription_left: meta.prescription_left,
        prescription_right: meta.prescription_right,
        version: meta.version,
    };

    let targets = file.targets.ok_or_else(|| AnalysisError::Parse {
        path: path.to_path_buf(),
        reason: "missing 'targets' sequence".to_string(),
    })?;
    let samples = file.samples.ok_or_else(|| AnalysisError::Parse {
        path: path.to_path_buf(),
        reason: "missing 'samples' sequence".to_string(),
    })?;
    if samples.len() != targets.len() {
        return Err(AnalysisError::Parse {
            path: path.to_path_buf(),
            reason: format!(
                "{} targets but {} sample lists",
                targets.len(),
                samples.len()
            ),
        });
    }

    let summary = METRIC_KEYS
        .iter()
        .filter_map(|key| {
            file.top_level
                .get(*key)
                .filter(|v| !v.is_null())
                .map(|v| (key.to_string(), v.clone()))
        })
        .collect();

    Ok(RawSessionRecord {
        source: path.to_path_buf(),
        metadata,
        targets,
        samples,
        summary,
    })
}

/// Required metadata values are stringified the way they appear in the file:
/// strings verbatim, numbers and booleans in their JSON form.
fn required(
    value: &Option<Value>,
    field: &'static str,
    path: &Path,
) -> Result<String, AnalysisError> {
    match value {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(v @ (Value::Number(_) | Value::Bool(_))) => Ok(v.to_string()),
        Some(other) => Err(AnalysisError::Parse {
            path: path.to_path_buf(),
            reason: format!("metadata field '{field}' has unsupported value {other}"),
        }),
        None => Err(AnalysisError::MissingField {
            path: path.to_path_buf(),
            field,
        }),
    }
}

#[derive(Debug, Deserialize)]
struct RecordFile {
    metadata: Option<MetadataFile>,
    targets: Option<Vec<TargetDescriptor>>,
    samples: Option<Vec<Vec<GazeSample>>>,
    #[serde(flatten)]
    top_level: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct MetadataFile {
    #[serde(default)]
    lab: Option<Value>,
    #[serde(default)]
    part_id: Option<Value>,
    #[serde(default)]
    session: Option<Value>,
    #[serde(default)]
    datetime: Option<Value>,
    #[serde(default)]
    engine: Option<Value>,
    #[serde(default)]
    engine_version: Option<Value>,
    #[serde(default)]
    platform: Option<Value>,
    #[serde(default)]
    eye_tracker: Option<Value>,
    #[serde(default)]
    age: Option<Value>,
    #[serde(default)]
    gender: Option<Value>,
    #[serde(default)]
    vision: Option<Value>,
    #[serde(default, rename = "prescriptionL")]
    prescription_left: Option<Value>,
    #[serde(default, rename = "prescriptionR")]
    prescription_right: Option<Value>,
    #[serde(default, alias = "task_version")]
    version: Option<Value>,
}
