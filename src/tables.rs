//! Output relations and their persistence
//!
//! A batch produces three relations (sessions, targets, samples) joinable on
//! `(uid, val_id)`, the participant ordinal list, and a manifest describing
//! the batch. Relations are stored as NDJSON, one row per line.

use crate::anonymize::ParticipantEntry;
use crate::error::AnalysisError;
use crate::types::{SampleRow, SessionSummaryRow, TargetRow};
use crate::{GAZEVAL_VERSION, PRODUCER_NAME};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const SESSIONS_FILE: &str = "sessions.ndjson";
pub const TARGETS_FILE: &str = "targets.ndjson";
pub const SAMPLES_FILE: &str = "samples.ndjson";
pub const PARTICIPANTS_FILE: &str = "participants.ndjson";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Provenance of one import batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchManifest {
    pub producer: String,
    pub version: String,
    pub batch_id: String,
    pub created_at_utc: DateTime<Utc>,
    pub sources: Vec<PathBuf>,
    pub files: usize,
    pub sessions: usize,
    pub participants: usize,
    pub targets: usize,
    pub samples: usize,
}

/// The relations produced by one import batch. Frozen once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationTables {
    pub sessions: Vec<SessionSummaryRow>,
    pub targets: Vec<TargetRow>,
    pub samples: Vec<SampleRow>,
    pub participants: Vec<ParticipantEntry>,
    pub manifest: BatchManifest,
}

impl ValidationTables {
    /// Build tables and stamp a fresh manifest.
    pub fn new(
        sources: Vec<PathBuf>,
        files: usize,
        sessions: Vec<SessionSummaryRow>,
        targets: Vec<TargetRow>,
        samples: Vec<SampleRow>,
        participants: Vec<ParticipantEntry>,
    ) -> Self {
        let manifest = BatchManifest {
            producer: PRODUCER_NAME.to_string(),
            version: GAZEVAL_VERSION.to_string(),
            batch_id: Uuid::new_v4().to_string(),
            created_at_utc: Utc::now(),
            sources,
            files,
            sessions: sessions.len(),
            participants: participants.len(),
            targets: targets.len(),
            samples: samples.len(),
        };
        Self {
            sessions,
            targets,
            samples,
            participants,
            manifest,
        }
    }

    /// Target rows of one session, in input order
    pub fn targets_for(&self, val_id: &str) -> Vec<TargetRow> {
        self.targets
            .iter()
            .filter(|t| t.val_id == val_id)
            .cloned()
            .collect()
    }

    /// Write all relations and the manifest into `dir`, creating it if needed.
    pub fn write_dir(&self, dir: &Path) -> Result<(), AnalysisError> {
        fs::create_dir_all(dir)?;
        write_ndjson(&dir.join(SESSIONS_FILE), &self.sessions)?;
        write_ndjson(&dir.join(TARGETS_FILE), &self.targets)?;
        write_ndjson(&dir.join(SAMPLES_FILE), &self.samples)?;
        write_ndjson(&dir.join(PARTICIPANTS_FILE), &self.participants)?;
        fs::write(
            dir.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&self.manifest)?,
        )?;
        Ok(())
    }

    /// Reload relations written by [`ValidationTables::write_dir`].
    pub fn read_dir(dir: &Path) -> Result<Self, AnalysisError> {
        let manifest = serde_json::from_str(&fs::read_to_string(dir.join(MANIFEST_FILE))?)?;
        Ok(Self {
            sessions: read_ndjson(&dir.join(SESSIONS_FILE))?,
            targets: read_ndjson(&dir.join(TARGETS_FILE))?,
            samples: read_ndjson(&dir.join(SAMPLES_FILE))?,
            participants: read_ndjson(&dir.join(PARTICIPANTS_FILE))?,
            manifest,
        })
    }
}

/// Write rows as newline-delimited JSON
pub fn write_ndjson<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), AnalysisError> {
    let mut writer = BufWriter::new(fs::File::create(path)?);
    for row in rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Parse newline-delimited JSON, skipping blank lines
pub fn parse_ndjson<T: DeserializeOwned>(ndjson: &str) -> Result<Vec<T>, AnalysisError> {
    let mut rows = Vec::new();
    for (line_num, line) in ndjson.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let row = serde_json::from_str(trimmed).map_err(|e| {
            AnalysisError::Configuration(format!("invalid row on line {}: {}", line_num + 1, e))
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Read a newline-delimited JSON file
pub fn read_ndjson<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, AnalysisError> {
    let content = fs::read_to_string(path)?;
    parse_ndjson(&content).map_err(|e| match e {
        AnalysisError::Configuration(msg) => {
            AnalysisError::Configuration(format!("{}: {}", path.display(), msg))
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TargetResult;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::collections::BTreeMap;

    fn tables() -> ValidationTables {
        let mut columns = BTreeMap::new();
        columns.insert("acc".to_string(), Value::from(0.8));
        columns.insert("engine".to_string(), Value::from("vizard"));
        let session = SessionSummaryRow {
            uid: "u1".into(),
            session: "1".into(),
            val_id: "v1".into(),
            columns,
        };
        let target = TargetRow {
            uid: "u1".into(),
            session: "1".into(),
            val_id: "v1".into(),
            target: TargetResult {
                target_index: 0,
                x: 0.0,
                y: 0.0,
                d: 6.0,
                acc: Some(0.8),
                sd: Some(0.2),
                rmsi: None,
                repeated: Some(0.0),
                n_samples: 3,
            },
        };
        ValidationTables::new(
            vec![PathBuf::from("data")],
            1,
            vec![session],
            vec![target],
            vec![],
            vec![ParticipantEntry {
                uid: "u1".into(),
                ordinal: 1,
            }],
        )
    }

    #[test]
    fn test_manifest_counts() {
        let t = tables();
        assert_eq!(t.manifest.producer, PRODUCER_NAME);
        assert_eq!(t.manifest.sessions, 1);
        assert_eq!(t.manifest.targets, 1);
        assert_eq!(t.manifest.samples, 0);
        assert_eq!(t.manifest.batch_id.len(), 36);
    }

    #[test]
    fn test_write_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let t = tables();
        t.write_dir(dir.path()).unwrap();

        let sessions = fs::read_to_string(dir.path().join(SESSIONS_FILE)).unwrap();
        assert_eq!(sessions.lines().count(), 1);
        let first: Value = serde_json::from_str(sessions.lines().next().unwrap()).unwrap();
        assert_eq!(first["engine"], "vizard");
        assert_eq!(first["uid"], "u1");

        let back = ValidationTables::read_dir(dir.path()).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_parse_ndjson_reports_line() {
        let err = parse_ndjson::<ParticipantEntry>("{\"uid\":\"a\",\"ordinal\":1}\n\nnope\n")
            .unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_targets_for() {
        let t = tables();
        assert_eq!(t.targets_for("v1").len(), 1);
        assert!(t.targets_for("other").is_empty());
    }
}
