//! Pipeline orchestration
//!
//! This module provides the public API for gazeval.
//! It orchestrates the full pipeline from record folders to aggregated
//! target matrices.

use crate::aggregate::aggregate_matrices;
use crate::binning::{fill_target_matrix, BinningConfig};
use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::loader::ValidationLoader;
use crate::matrix::TargetMatrix;
use crate::recompute::AngularRecomputer;
use crate::record::discover_record_files;
use crate::stats::Reduction;
use crate::tables::ValidationTables;
use crate::types::TargetRow;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Import every record file in the given folders into output relations.
///
/// Uses the built-in [`AngularRecomputer`]. Supply a different recomputer
/// through [`ValidationLoader`] directly.
///
/// # Example
/// ```ignore
/// let config = AnalysisConfig::with_salt("lab-secret");
/// let tables = import_folders(&["data/JLU_KF"], &config)?;
/// tables.write_dir(Path::new("out"))?;
/// ```
pub fn import_folders<P: AsRef<Path>>(
    folders: &[P],
    config: &AnalysisConfig,
) -> Result<ValidationTables, AnalysisError> {
    ValidationLoader::new(config, AngularRecomputer)?.load_folders(folders)
}

/// Bin target rows into one matrix per session.
///
/// Rows are grouped by `val_id`; matrices come out in the order each session
/// first appears.
pub fn session_matrices(
    targets: &[TargetRow],
    binning: &BinningConfig,
) -> Result<Vec<TargetMatrix>, AnalysisError> {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<TargetRow>> = HashMap::new();
    for row in targets {
        groups
            .entry(row.val_id.as_str())
            .or_insert_with(|| {
                order.push(row.val_id.as_str());
                Vec::new()
            })
            .push(row.clone());
    }

    let mut matrices = Vec::with_capacity(order.len());
    for val_id in order {
        if let Some(rows) = groups.get(val_id) {
            debug!(val_id, targets = rows.len(), "binning session");
            matrices.push(fill_target_matrix(rows, binning)?);
        }
    }
    Ok(matrices)
}

/// Bin every session and aggregate the matrices with `reduction`.
pub fn aggregate_sessions(
    targets: &[TargetRow],
    binning: &BinningConfig,
    reduction: Reduction,
) -> Result<TargetMatrix, AnalysisError> {
    let matrices = session_matrices(targets, binning)?;
    aggregate_matrices(&matrices, reduction)
}

/// Processor holding one validated configuration for several batches.
///
/// Every import is an independent batch: participant ordinals start at 1 and
/// the participant relation lists only that batch's participants.
pub struct GazeProcessor {
    loader: ValidationLoader<AngularRecomputer>,
    binning: BinningConfig,
}

impl GazeProcessor {
    /// Create a processor; fails on an invalid configuration.
    pub fn new(config: &AnalysisConfig) -> Result<Self, AnalysisError> {
        Ok(Self {
            loader: ValidationLoader::new(config, AngularRecomputer)?,
            binning: config.binning,
        })
    }

    /// Import a batch of folders.
    pub fn import<P: AsRef<Path>>(&self, folders: &[P]) -> Result<ValidationTables, AnalysisError> {
        let files = discover_record_files(folders)?;
        let sources = folders.iter().map(|f| f.as_ref().to_path_buf()).collect();
        info!(files = files.len(), folders = folders.len(), "importing batch");
        self.loader.load_files(sources, &files)
    }

    /// Per-session matrices of an imported batch
    pub fn matrices(&self, tables: &ValidationTables) -> Result<Vec<TargetMatrix>, AnalysisError> {
        session_matrices(&tables.targets, &self.binning)
    }

    /// Aggregate matrix of an imported batch
    pub fn aggregate(
        &self,
        tables: &ValidationTables,
        reduction: Reduction,
    ) -> Result<TargetMatrix, AnalysisError> {
        aggregate_sessions(&tables.targets, &self.binning, reduction)
    }
}
