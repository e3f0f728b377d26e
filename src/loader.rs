//! Validation record loader
//!
//! Turns a pool of session record files into the flattened output relations.
//! Per record:
//! 1. parse and check required metadata
//! 2. derive `uid` / `val_id`
//! 3. recompute metrics once per [`MetricVariant`]
//! 4. flatten metadata and metrics into the session summary row
//! 5. emit target and sample rows from the raw variant
//!
//! The first malformed file aborts the batch.

use crate::anonymize::{Anonymizer, ParticipantRegistry};
use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::recompute::{MetricsRecomputer, MetricsResult, RecomputeConfig};
use crate::record::{discover_record_files, read_record};
use crate::tables::ValidationTables;
use crate::types::{
    MetricVariant, RawSessionRecord, SampleRow, SessionSummaryRow, TargetRow, METADATA_FIELDS,
    METRIC_KEYS, RAW_SOURCE_SUFFIX,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Rows produced from a single record
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSession {
    pub summary: SessionSummaryRow,
    pub targets: Vec<TargetRow>,
    pub samples: Vec<SampleRow>,
}

/// Loads session records into [`ValidationTables`]
pub struct ValidationLoader<R: MetricsRecomputer> {
    anonymizer: Anonymizer,
    recomputer: R,
    variants: Vec<(MetricVariant, RecomputeConfig)>,
}

impl<R: MetricsRecomputer> ValidationLoader<R> {
    /// Create a loader. The configuration is validated here.
    pub fn new(config: &AnalysisConfig, recomputer: R) -> Result<Self, AnalysisError> {
        config.validate()?;
        let variants = MetricVariant::ALL
            .iter()
            .map(|v| (*v, RecomputeConfig::for_variant(*v, config)))
            .collect();
        Ok(Self {
            anonymizer: Anonymizer::new(config.salt.clone())?,
            recomputer,
            variants,
        })
    }

    pub fn anonymizer(&self) -> &Anonymizer {
        &self.anonymizer
    }

    /// Load every record file directly inside the given folders.
    pub fn load_folders<P: AsRef<Path>>(
        &self,
        folders: &[P],
    ) -> Result<ValidationTables, AnalysisError> {
        let files = discover_record_files(folders)?;
        let sources = folders.iter().map(|f| f.as_ref().to_path_buf()).collect();
        if files.is_empty() {
            warn!("no record files found");
        } else {
            info!(files = files.len(), "importing validation records");
        }
        self.load_files(sources, &files)
    }

    /// Load an explicit list of record files as one batch.
    ///
    /// Participant ordinals are scoped to the batch; the registry is dropped
    /// when the tables are returned.
    pub fn load_files(
        &self,
        sources: Vec<PathBuf>,
        files: &[PathBuf],
    ) -> Result<ValidationTables, AnalysisError> {
        let mut registry = ParticipantRegistry::new();
        let mut sessions = Vec::with_capacity(files.len());
        let mut targets = Vec::new();
        let mut samples = Vec::new();

        for path in files {
            let record = read_record(path)?;
            let loaded = self.load_record(&record, &mut registry)?;
            debug!(
                file = %path.display(),
                val_id = %loaded.summary.val_id,
                targets = loaded.targets.len(),
                samples = loaded.samples.len(),
                "imported record"
            );
            sessions.push(loaded.summary);
            targets.extend(loaded.targets);
            samples.extend(loaded.samples);
        }

        info!(
            sessions = sessions.len(),
            participants = registry.len(),
            targets = targets.len(),
            samples = samples.len(),
            "import finished"
        );

        Ok(ValidationTables::new(
            sources,
            files.len(),
            sessions,
            targets,
            samples,
            registry.entries(),
        ))
    }

    /// Flatten one parsed record, registering its participant.
    pub fn load_record(
        &self,
        record: &RawSessionRecord,
        registry: &mut ParticipantRegistry,
    ) -> Result<LoadedSession, AnalysisError> {
        let meta = &record.metadata;
        let uid = self.anonymizer.uid(&meta.lab, &meta.participant_id);
        let val_id = self
            .anonymizer
            .val_id(&meta.lab, &meta.participant_id, &meta.datetime);
        registry.observe(&uid);

        let mut columns = BTreeMap::new();
        for field in METADATA_FIELDS {
            if let Some(value) = meta.field(field) {
                columns.insert(field.to_string(), value);
            }
        }
        for key in METRIC_KEYS {
            if let Some(value) = record.summary.get(key) {
                columns.insert(format!("{key}{RAW_SOURCE_SUFFIX}"), value.clone());
            }
        }

        let mut raw: Option<MetricsResult> = None;
        for (variant, config) in &self.variants {
            let result = self
                .recomputer
                .recompute(record, config)
                .map_err(|e| with_source(e, &record.source))?;
            flatten_metrics(&result, *variant, &mut columns);
            if *variant == MetricVariant::Raw {
                raw = Some(result);
            }
        }
        columns.insert("num_targets".to_string(), Value::from(record.targets.len()));

        let raw = raw.unwrap_or_default();
        let targets = raw
            .targets
            .into_iter()
            .map(|target| TargetRow {
                uid: uid.clone(),
                session: meta.session.clone(),
                val_id: val_id.clone(),
                target,
            })
            .collect();
        let samples = raw
            .samples
            .into_iter()
            .map(|sample| SampleRow {
                uid: uid.clone(),
                session: meta.session.clone(),
                val_id: val_id.clone(),
                sample,
            })
            .collect();

        Ok(LoadedSession {
            summary: SessionSummaryRow {
                uid,
                session: meta.session.clone(),
                val_id,
                columns,
            },
            targets,
            samples,
        })
    }
}

/// Copy allow-listed metrics of one variant into summary columns.
///
/// Non-finite values count as absent.
fn flatten_metrics(
    result: &MetricsResult,
    variant: MetricVariant,
    columns: &mut BTreeMap<String, Value>,
) {
    for key in METRIC_KEYS {
        match result.results.get(key) {
            Some(value) if value.is_finite() => {
                columns.insert(format!("{key}{}", variant.suffix()), Value::from(*value));
            }
            _ => {}
        }
    }
}

/// Recomputation errors carry no file; attach the record's path.
fn with_source(error: AnalysisError, path: &Path) -> AnalysisError {
    match error {
        AnalysisError::Configuration(reason) => AnalysisError::Parse {
            path: path.to_path_buf(),
            reason,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recompute::AngularRecomputer;
    use crate::record::parse_record;
    use crate::types::{SampleRecord, TargetResult};
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    /// Records every call and returns canned metrics
    struct ScriptedRecomputer {
        calls: RefCell<Vec<RecomputeConfig>>,
    }

    impl ScriptedRecomputer {
        fn new() -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl MetricsRecomputer for ScriptedRecomputer {
        fn recompute(
            &self,
            record: &RawSessionRecord,
            config: &RecomputeConfig,
        ) -> Result<MetricsResult, AnalysisError> {
            self.calls.borrow_mut().push(config.clone());
            let mut results = BTreeMap::new();
            results.insert("acc".to_string(), self.calls.borrow().len() as f64);
            // Monocular metrics only in the raw variant
            if config.outlier_threshold_deg.is_none() && config.inner_field.is_none() {
                results.insert("acc_L".to_string(), 0.5);
            }
            results.insert("not_allow_listed".to_string(), 9.0);
            let targets = record
                .targets
                .iter()
                .enumerate()
                .map(|(i, t)| TargetResult {
                    target_index: i,
                    x: t.x,
                    y: t.y,
                    d: t.d,
                    acc: Some(1.0),
                    sd: None,
                    rmsi: None,
                    repeated: Some(0.0),
                    n_samples: 1,
                })
                .collect();
            let samples = vec![SampleRecord {
                target_index: 0,
                sample_index: 0,
                tar_x: 0.0,
                tar_y: 0.0,
                tar_d: 6.0,
                frame: Some(1),
                time: None,
                gaze_x: Some(0.1),
                gaze_y: Some(0.1),
                gaze_x_left: None,
                gaze_y_left: None,
                gaze_x_right: None,
                gaze_y_right: None,
                acc: Some(0.14),
                acc_left: None,
                acc_right: None,
            }];
            Ok(MetricsResult {
                results,
                samples,
                targets,
            })
        }
    }

    fn record() -> RawSessionRecord {
        parse_record(
            r#"{
                "metadata": {"lab": "JLU_KF", "part_id": "P01", "session": "2",
                             "datetime": "2021-03-01 10:00:00", "age": 31, "engine": "vizard"},
                "targets": [{"x": 0.0, "y": 0.0, "d": 6.0}, {"x": 5.0, "y": 5.0, "d": 6.0}],
                "samples": [[], []],
                "acc": 0.66,
                "ipd": 63.5
            }"#,
            Path::new("P01_s2.json"),
        )
        .unwrap()
    }

    fn loader<R: MetricsRecomputer>(recomputer: R) -> ValidationLoader<R> {
        ValidationLoader::new(&AnalysisConfig::with_salt("test-salt"), recomputer).unwrap()
    }

    #[test]
    fn test_recomputes_once_per_variant() {
        let loader = loader(ScriptedRecomputer::new());
        let mut registry = ParticipantRegistry::new();
        loader.load_record(&record(), &mut registry).unwrap();

        let calls = loader.recomputer.calls.borrow();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0].outlier_threshold_deg, None);
        assert_eq!(calls[1].outlier_threshold_deg, Some(5.0));
        assert_eq!(calls[2].inner_field, Some((10.0, 10.0)));
        assert!(calls[3].skip_missing_eye);
    }

    #[test]
    fn test_flattened_columns() {
        let loader = loader(ScriptedRecomputer::new());
        let mut registry = ParticipantRegistry::new();
        let loaded = loader.load_record(&record(), &mut registry).unwrap();
        let row = &loaded.summary;

        assert_eq!(row.session, "2");
        assert_eq!(row.uid, loader.anonymizer().uid("JLU_KF", "P01"));
        assert_eq!(row.metric("acc"), Some(1.0));
        assert_eq!(row.metric("acc_valid"), Some(2.0));
        assert_eq!(row.metric("acc_i10"), Some(3.0));
        assert_eq!(row.metric("acc_nomonoc"), Some(4.0));

        // Absent keys are not added as placeholders
        assert_eq!(row.metric("acc_L"), Some(0.5));
        assert!(!row.columns.contains_key("acc_L_valid"));
        assert!(!row.columns.contains_key("not_allow_listed"));

        // Device-reported summary and metadata
        assert_eq!(row.metric("acc_raw-source"), Some(0.66));
        assert_eq!(row.metric("ipd_raw-source"), Some(63.5));
        assert_eq!(row.columns["engine"], Value::from("vizard"));
        assert_eq!(row.columns["age"], Value::from(31));
        assert_eq!(row.columns["datetime"], Value::from("2021-03-01 10:00:00"));
        assert!(!row.columns.contains_key("gender"));
        assert_eq!(row.metric("num_targets"), Some(2.0));

        // Raw participant id never reaches the output
        let json = serde_json::to_string(row).unwrap();
        assert!(!json.contains("P01"));
    }

    #[test]
    fn test_non_finite_metrics_are_omitted() {
        let mut results = BTreeMap::new();
        results.insert("acc".to_string(), f64::NAN);
        results.insert("sd".to_string(), f64::INFINITY);
        results.insert("rmsi".to_string(), f64::NEG_INFINITY);
        results.insert("accX".to_string(), 0.25);
        let result = MetricsResult {
            results,
            ..MetricsResult::default()
        };

        let mut columns = BTreeMap::new();
        flatten_metrics(&result, MetricVariant::OutlierCorrected, &mut columns);

        assert_eq!(columns.len(), 1);
        assert_eq!(columns["accX_valid"], Value::from(0.25));
        assert!(!columns.contains_key("acc_valid"));
        assert!(!columns.contains_key("sd_valid"));
        assert!(!columns.contains_key("rmsi_valid"));
    }

    #[test]
    fn test_target_and_sample_rows_tagged() {
        let loader = loader(ScriptedRecomputer::new());
        let mut registry = ParticipantRegistry::new();
        let loaded = loader.load_record(&record(), &mut registry).unwrap();

        assert_eq!(loaded.targets.len(), 2);
        assert_eq!(loaded.samples.len(), 1);
        for t in &loaded.targets {
            assert_eq!(t.uid, loaded.summary.uid);
            assert_eq!(t.val_id, loaded.summary.val_id);
            assert_eq!(t.session, "2");
        }
        assert_eq!(loaded.samples[0].val_id, loaded.summary.val_id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_invalid_config_rejected_up_front() {
        let mut bad = AnalysisConfig::with_salt("s");
        bad.sample_window.start = 200;
        bad.sample_window.end = 100;
        assert!(ValidationLoader::new(&bad, AngularRecomputer).is_err());
        assert!(ValidationLoader::new(&AnalysisConfig::default(), AngularRecomputer).is_err());
    }

    #[test]
    fn test_recomputer_errors_name_the_file() {
        let err = with_source(
            AnalysisError::Configuration("no samples for target 3".into()),
            Path::new("x.json"),
        );
        assert!(err.is_parse_error());
        assert!(err.to_string().contains("x.json"));
    }

    #[test]
    fn test_load_folders_aborts_on_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            r#"{"metadata": {"lab": "L", "part_id": "P", "session": "1", "datetime": "t"},
                "targets": [], "samples": []}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.json"),
            r#"{"metadata": {"lab": "L", "session": "1", "datetime": "t"},
                "targets": [], "samples": []}"#,
        )
        .unwrap();

        let err = loader(AngularRecomputer)
            .load_folders(&[dir.path()])
            .unwrap_err();
        assert!(err.is_parse_error());
        assert!(err.to_string().contains("b.json"));
    }

    #[test]
    fn test_empty_folder_gives_empty_tables() {
        let dir = tempfile::tempdir().unwrap();
        let tables = loader(AngularRecomputer).load_folders(&[dir.path()]).unwrap();
        assert!(tables.sessions.is_empty());
        assert_eq!(tables.manifest.files, 0);
    }
}
