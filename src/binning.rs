//! Spatial binning of per-target metrics
//!
//! Targets are placed on the lattice only when their (x, y) position equals a
//! lattice coordinate exactly. There is no nearest-cell snapping: targets off
//! the lattice are left out of the matrix, and their cells stay missing.

use crate::error::AnalysisError;
use crate::matrix::{DepthPlane, Measure, TargetMatrix};
use crate::types::TargetRow;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default lattice spacing (degrees)
pub const DEFAULT_GRID_DEG: f64 = 5.0;

/// Default lattice extent on both axes (degrees)
pub const DEFAULT_EXTENT_DEG: (f64, f64) = (-15.0, 15.0);

/// Lattice geometry for binning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinningConfig {
    /// Lattice spacing (degrees)
    pub grid: f64,
    /// Horizontal extent; derived from the data when `None`
    pub x_range: Option<(f64, f64)>,
    /// Vertical extent; derived from the data when `None`
    pub y_range: Option<(f64, f64)>,
}

impl Default for BinningConfig {
    fn default() -> Self {
        Self {
            grid: DEFAULT_GRID_DEG,
            x_range: Some(DEFAULT_EXTENT_DEG),
            y_range: Some(DEFAULT_EXTENT_DEG),
        }
    }
}

impl BinningConfig {
    /// Check the spacing and any fixed extent, including the lattice size.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !(self.grid.is_finite() && self.grid > 0.0) {
            return Err(AnalysisError::Configuration(format!(
                "grid spacing must be a positive angle, got {}",
                self.grid
            )));
        }
        for (axis, range) in [("x", self.x_range), ("y", self.y_range)] {
            if let Some(range) = range {
                validate_range(axis, range)?;
            }
        }
        if let (Some(x_range), Some(y_range)) = (self.x_range, self.y_range) {
            TargetMatrix::empty(x_range, y_range, self.grid).shape()?;
        }
        Ok(())
    }
}

fn validate_range(axis: &str, (min, max): (f64, f64)) -> Result<(), AnalysisError> {
    if !(min.is_finite() && max.is_finite()) || min > max {
        return Err(AnalysisError::Configuration(format!(
            "invalid {axis} extent ({min}, {max})"
        )));
    }
    Ok(())
}

/// Bin one session's target rows into a [`TargetMatrix`].
///
/// All rows must belong to the same `val_id`. When two targets share a cell
/// and depth plane, the later row wins.
pub fn fill_target_matrix(
    rows: &[TargetRow],
    config: &BinningConfig,
) -> Result<TargetMatrix, AnalysisError> {
    let first = rows.first().ok_or_else(|| {
        AnalysisError::Configuration("no target rows to bin".to_string())
    })?;
    if let Some(other) = rows.iter().find(|r| r.val_id != first.val_id) {
        return Err(AnalysisError::Configuration(format!(
            "target rows mix sessions {} and {}",
            first.val_id, other.val_id
        )));
    }
    config.validate()?;

    let x_range = config
        .x_range
        .unwrap_or_else(|| data_range(rows.iter().map(|r| r.target.x)));
    let y_range = config
        .y_range
        .unwrap_or_else(|| data_range(rows.iter().map(|r| r.target.y)));
    validate_range("x", x_range)?;
    validate_range("y", y_range)?;

    let mut matrix = TargetMatrix::empty(x_range, y_range, config.grid);
    matrix.val_id = Some(first.val_id.clone());

    let shape = matrix.shape()?;
    let mut dropped = 0;
    for row in rows {
        let depth = DepthPlane::new(row.target.d);
        for measure in Measure::ALL {
            matrix
                .measure_mut(measure)
                .entry(depth)
                .or_insert_with(|| Array2::from_elem(shape, f64::NAN));
        }

        let Some((r, c)) = matrix.cell_index(row.target.x, row.target.y) else {
            dropped += 1;
            continue;
        };
        let t = &row.target;
        for (measure, value) in [
            (Measure::Accuracy, t.acc),
            (Measure::Sd, t.sd),
            (Measure::Rmsi, t.rmsi),
            (Measure::Repeated, t.repeated),
        ] {
            if let Some(grid) = matrix.measure_mut(measure).get_mut(&depth) {
                grid[[r, c]] = value.unwrap_or(f64::NAN);
            }
        }
    }

    if dropped > 0 {
        debug!(
            val_id = %first.val_id,
            dropped,
            "targets off the lattice were left out of the matrix"
        );
    }

    Ok(matrix)
}

fn data_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TargetResult;

    fn row(val_id: &str, x: f64, y: f64, d: f64, acc: f64) -> TargetRow {
        TargetRow {
            uid: "u".to_string(),
            session: "1".to_string(),
            val_id: val_id.to_string(),
            target: TargetResult {
                target_index: 0,
                x,
                y,
                d,
                acc: Some(acc),
                sd: Some(acc / 2.0),
                rmsi: Some(acc / 4.0),
                repeated: Some(1.0),
                n_samples: 10,
            },
        }
    }

    #[test]
    fn test_empty_input_is_configuration_error() {
        let err = fill_target_matrix(&[], &BinningConfig::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::Configuration(_)));
    }

    #[test]
    fn test_exact_lattice_placement() {
        let rows = vec![row("v1", 5.0, -5.0, 6.0, 0.9)];
        let m = fill_target_matrix(&rows, &BinningConfig::default()).unwrap();

        assert_eq!(m.val_id.as_deref(), Some("v1"));
        assert_eq!(m.n, 1);
        assert_eq!(m.grid, 5.0);
        assert_eq!(m.x_range, (-15.0, 15.0));

        let acc = &m.acc[&DepthPlane::new(6.0)];
        assert_eq!(acc.dim(), (7, 7));
        assert_eq!(acc[[4, 4]], 0.9);
        assert_eq!(m.sd[&DepthPlane::new(6.0)][[4, 4]], 0.45);
        assert_eq!(m.rep[&DepthPlane::new(6.0)][[4, 4]], 1.0);
        assert_eq!(acc.iter().filter(|v| !v.is_nan()).count(), 1);
    }

    #[test]
    fn test_off_lattice_target_dropped() {
        let rows = vec![row("v1", 5.0, -5.0, 6.0, 0.9), row("v1", 2.5, 0.0, 6.0, 1.2)];
        let m = fill_target_matrix(&rows, &BinningConfig::default()).unwrap();
        let acc = &m.acc[&DepthPlane::new(6.0)];

        // Neighbouring cells remain the sentinel, not zero
        assert!(acc[[3, 3]].is_nan());
        assert!(acc[[3, 4]].is_nan());
        assert_eq!(acc.iter().filter(|v| !v.is_nan()).count(), 1);
    }

    #[test]
    fn test_off_lattice_only_plane_still_exists() {
        let rows = vec![row("v1", 1.0, 1.0, 0.5, 0.3)];
        let m = fill_target_matrix(&rows, &BinningConfig::default()).unwrap();
        let grid = &m.acc[&DepthPlane::new(0.5)];
        assert!(grid.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_depth_planes_and_overwrite() {
        let rows = vec![
            row("v1", 0.0, 0.0, 6.0, 1.0),
            row("v1", 0.0, 0.0, 0.5, 2.0),
            row("v1", 0.0, 0.0, 6.0, 3.0),
        ];
        let m = fill_target_matrix(&rows, &BinningConfig::default()).unwrap();
        assert_eq!(m.depths().len(), 2);
        assert_eq!(m.value_at(Measure::Accuracy, 6.0, 0.0, 0.0), Some(3.0));
        assert_eq!(m.value_at(Measure::Accuracy, 0.5, 0.0, 0.0), Some(2.0));
    }

    #[test]
    fn test_missing_metric_writes_sentinel() {
        let mut r = row("v1", 0.0, 0.0, 6.0, 1.0);
        r.target.rmsi = None;
        let m = fill_target_matrix(&[r], &BinningConfig::default()).unwrap();
        assert_eq!(m.value_at(Measure::Accuracy, 6.0, 0.0, 0.0), Some(1.0));
        assert_eq!(m.value_at(Measure::Rmsi, 6.0, 0.0, 0.0), None);
    }

    #[test]
    fn test_extent_derived_from_data() {
        let rows = vec![row("v1", -10.0, 0.0, 6.0, 1.0), row("v1", 10.0, 5.0, 6.0, 2.0)];
        let config = BinningConfig {
            grid: 5.0,
            x_range: None,
            y_range: None,
        };
        let m = fill_target_matrix(&rows, &config).unwrap();
        assert_eq!(m.x_range, (-10.0, 10.0));
        assert_eq!(m.y_range, (0.0, 5.0));
        assert_eq!(m.shape().unwrap(), (2, 5));
        assert_eq!(m.value_at(Measure::Accuracy, 6.0, 10.0, 5.0), Some(2.0));
    }

    #[test]
    fn test_mixed_sessions_rejected() {
        let rows = vec![row("v1", 0.0, 0.0, 6.0, 1.0), row("v2", 0.0, 0.0, 6.0, 1.0)];
        let err = fill_target_matrix(&rows, &BinningConfig::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::Configuration(_)));
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        let rows = vec![row("v1", 0.0, 0.0, 6.0, 1.0)];
        let zero_grid = BinningConfig {
            grid: 0.0,
            ..BinningConfig::default()
        };
        assert!(fill_target_matrix(&rows, &zero_grid).is_err());

        let inverted = BinningConfig {
            x_range: Some((15.0, -15.0)),
            ..BinningConfig::default()
        };
        assert!(fill_target_matrix(&rows, &inverted).is_err());
    }

    #[test]
    fn test_oversized_lattice_rejected() {
        let rows = vec![row("v1", 0.0, 0.0, 6.0, 1.0)];
        let tiny_grid = BinningConfig {
            grid: 1e-12,
            ..BinningConfig::default()
        };
        assert!(matches!(
            tiny_grid.validate(),
            Err(AnalysisError::Configuration(_))
        ));
        assert!(matches!(
            fill_target_matrix(&rows, &tiny_grid),
            Err(AnalysisError::Configuration(_))
        ));

        // Extent taken from the data is bounded as well
        let spread = vec![row("v1", -1e6, 0.0, 6.0, 1.0), row("v1", 1e6, 0.0, 6.0, 1.0)];
        let from_data = BinningConfig {
            grid: 1.0,
            x_range: None,
            y_range: None,
        };
        assert!(matches!(
            fill_target_matrix(&spread, &from_data),
            Err(AnalysisError::Configuration(_))
        ));
    }
}
