//! Aggregation of target matrices across sessions
//!
//! Grids are stacked along a new axis and reduced cell by cell. With the
//! default mean, a cell missing in any input is missing in the result; pass a
//! missing-aware reduction such as [`Reduction::NanMean`] to skip such cells.
//!
//! A depth plane absent from some inputs is treated as all-missing for those
//! inputs.

use crate::error::AnalysisError;
use crate::matrix::{DepthPlane, Measure, TargetMatrix};
use crate::stats::Reduction;
use ndarray::{ArrayView1, ArrayView2, Axis};
use tracing::info;

/// Label used for inputs that carry no `val_id` (already aggregated)
const AGGREGATE_LABEL: &str = "<aggregate>";

/// Aggregate matrices with one of the built-in reductions.
pub fn aggregate_matrices(
    matrices: &[TargetMatrix],
    reduction: Reduction,
) -> Result<TargetMatrix, AnalysisError> {
    aggregate_matrices_with(matrices, |lane| reduction.reduce_lane(lane))
}

/// Aggregate matrices with a custom per-cell reduction.
///
/// `reduce` receives one value per input matrix, in input order. Each input
/// is validated first, so a deserialized matrix with a bad geometry is a
/// configuration error.
pub fn aggregate_matrices_with<F>(
    matrices: &[TargetMatrix],
    reduce: F,
) -> Result<TargetMatrix, AnalysisError>
where
    F: Fn(ArrayView1<f64>) -> f64,
{
    let first = matrices.first().ok_or_else(|| {
        AnalysisError::Configuration("no matrices to aggregate".to_string())
    })?;

    for matrix in matrices {
        matrix.validate()?;
        check_geometry(first, matrix)?;
    }

    let mut depths: Vec<DepthPlane> = matrices.iter().flat_map(TargetMatrix::depths).collect();
    depths.sort();
    depths.dedup();

    let mut result = TargetMatrix::empty(first.x_range, first.y_range, first.grid);
    result.n = matrices.len();

    let missing = first.missing_grid()?;
    for measure in Measure::ALL {
        for depth in &depths {
            let views: Vec<ArrayView2<f64>> = matrices
                .iter()
                .map(|m| m.measure(measure).get(depth).unwrap_or(&missing).view())
                .collect();
            let stacked = ndarray::stack(Axis(2), &views).map_err(|e| {
                AnalysisError::Configuration(format!("cannot stack {} grids: {e}", measure.key()))
            })?;
            let reduced = stacked.map_axis(Axis(2), |lane| reduce(lane));
            result.measure_mut(measure).insert(*depth, reduced);
        }
    }

    info!(
        matrices = matrices.len(),
        depth_planes = depths.len(),
        "aggregated target matrices"
    );

    Ok(result)
}

fn check_geometry(reference: &TargetMatrix, matrix: &TargetMatrix) -> Result<(), AnalysisError> {
    let label = || {
        matrix
            .val_id
            .clone()
            .unwrap_or_else(|| AGGREGATE_LABEL.to_string())
    };

    if matrix.x_range != reference.x_range
        || matrix.y_range != reference.y_range
        || matrix.grid != reference.grid
    {
        return Err(AnalysisError::Consistency {
            val_id: label(),
            details: format!(
                "extent x={:?} y={:?} grid={} differs from x={:?} y={:?} grid={}",
                matrix.x_range,
                matrix.y_range,
                matrix.grid,
                reference.x_range,
                reference.y_range,
                reference.grid
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binning::{fill_target_matrix, BinningConfig};
    use crate::types::{TargetResult, TargetRow};

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
                sd: Some(acc),
                rmsi: Some(acc),
                repeated: Some(0.0),
                n_samples: 10,
            },
        }
    }

    fn matrix(
        val_id: &str,
        rows: &[(f64, f64, f64, f64)],
        config: &BinningConfig,
    ) -> TargetMatrix {
        let rows: Vec<TargetRow> = rows
            .iter()
            .map(|(x, y, d, acc)| row(val_id, *x, *y, *d, *acc))
            .collect();
        fill_target_matrix(&rows, config).unwrap()
    }

    #[test]
    fn test_empty_input_rejected() {
        let err = aggregate_matrices(&[], Reduction::Mean).unwrap_err();
        assert!(matches!(err, AnalysisError::Configuration(_)));
    }

    #[test]
    fn test_single_matrix_identity() {
        let config = BinningConfig::default();
        let m = matrix("v1", &[(0.0, 0.0, 6.0, 0.5), (5.0, -5.0, 0.5, 1.5)], &config);
        let agg = aggregate_matrices(std::slice::from_ref(&m), Reduction::Mean).unwrap();

        assert_eq!(agg.n, 1);
        assert_eq!(agg.val_id, None);
        assert_eq!(agg.x_range, m.x_range);
        assert_eq!(agg.depths(), m.depths());
        for measure in Measure::ALL {
            for (depth, grid) in m.measure(measure) {
                let out = &agg.measure(measure)[depth];
                for (a, b) in grid.iter().zip(out.iter()) {
                    assert!(a == b || (a.is_nan() && b.is_nan()));
                }
            }
        }
    }

    #[test]
    fn test_mean_poisons_missing_cells() {
        let config = BinningConfig::default();
        let a = matrix("v1", &[(0.0, 0.0, 6.0, 1.0), (5.0, 0.0, 6.0, 4.0)], &config);
        let b = matrix("v2", &[(0.0, 0.0, 6.0, 3.0)], &config);

        let agg = aggregate_matrices(&[a.clone(), b.clone()], Reduction::Mean).unwrap();
        assert_eq!(agg.n, 2);
        assert_eq!(agg.value_at(Measure::Accuracy, 6.0, 0.0, 0.0), Some(2.0));
        assert_eq!(agg.value_at(Measure::Accuracy, 6.0, 5.0, 0.0), None);

        let nan_aware = aggregate_matrices(&[a, b], Reduction::NanMean).unwrap();
        assert_eq!(nan_aware.value_at(Measure::Accuracy, 6.0, 5.0, 0.0), Some(4.0));
    }

    #[test]
    fn test_grid_mismatch_names_val_id() {
        let a = matrix("v1", &[(0.0, 0.0, 6.0, 1.0)], &BinningConfig::default());
        let b = matrix(
            "v2",
            &[(0.0, 0.0, 6.0, 1.0)],
            &BinningConfig {
                grid: 2.5,
                ..BinningConfig::default()
            },
        );
        let err = aggregate_matrices(&[a, b], Reduction::Mean).unwrap_err();
        match err {
            AnalysisError::Consistency { val_id, .. } => assert_eq!(val_id, "v2"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_extent_mismatch_rejected() {
        let a = matrix("v1", &[(0.0, 0.0, 6.0, 1.0)], &BinningConfig::default());
        let b = matrix(
            "v2",
            &[(0.0, 0.0, 6.0, 1.0)],
            &BinningConfig {
                x_range: Some((-10.0, 10.0)),
                ..BinningConfig::default()
            },
        );
        assert!(matches!(
            aggregate_matrices(&[a, b], Reduction::Mean),
            Err(AnalysisError::Consistency { .. })
        ));
    }

    #[test]
    fn test_absent_depth_plane_counts_as_missing() {
        let config = BinningConfig::default();
        let a = matrix("v1", &[(0.0, 0.0, 6.0, 1.0), (0.0, 0.0, 0.5, 2.0)], &config);
        let b = matrix("v2", &[(0.0, 0.0, 6.0, 3.0)], &config);

        let agg = aggregate_matrices(&[a.clone(), b.clone()], Reduction::Mean).unwrap();
        assert_eq!(agg.depths().len(), 2);
        assert_eq!(agg.value_at(Measure::Accuracy, 0.5, 0.0, 0.0), None);

        let nan_aware = aggregate_matrices(&[a, b], Reduction::NanMean).unwrap();
        assert_eq!(nan_aware.value_at(Measure::Accuracy, 0.5, 0.0, 0.0), Some(2.0));
    }

    #[test]
    fn test_custom_reduction() {
        let config = BinningConfig::default();
        let a = matrix("v1", &[(0.0, 0.0, 6.0, 1.0)], &config);
        let b = matrix("v2", &[(0.0, 0.0, 6.0, 5.0)], &config);
        let max = aggregate_matrices_with(&[a, b], |lane| {
            lane.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        })
        .unwrap();
        assert_eq!(max.value_at(Measure::Accuracy, 6.0, 0.0, 0.0), Some(5.0));
    }

    #[test]
    fn test_malformed_grid_shape_rejected() {
        let config = BinningConfig::default();
        let a = matrix("v1", &[(0.0, 0.0, 6.0, 1.0)], &config);
        let mut b = matrix("v2", &[(0.0, 0.0, 6.0, 1.0)], &config);
        b.acc
            .insert(DepthPlane::new(6.0), ndarray::Array2::from_elem((2, 2), 1.0));
        assert!(matches!(
            aggregate_matrices(&[a, b], Reduction::Mean),
            Err(AnalysisError::Configuration(_))
        ));
    }

    #[test]
    fn test_bad_geometry_rejected_before_stacking() {
        let zero_grid: TargetMatrix = serde_json::from_str(
            r#"{"x_range": [-15, 15], "y_range": [-15, 15], "grid": 0, "n": 1,
                "acc": {}, "sd": {}, "rmsi": {}, "rep": {}}"#,
        )
        .unwrap();
        assert!(matches!(
            aggregate_matrices(&[zero_grid.clone(), zero_grid], Reduction::Mean),
            Err(AnalysisError::Configuration(_))
        ));

        // A later input with a bad geometry is caught too
        let good = matrix("v1", &[(0.0, 0.0, 6.0, 1.0)], &BinningConfig::default());
        let mut huge = good.clone();
        huge.grid = 1e-12;
        assert!(matches!(
            aggregate_matrices(&[good, huge], Reduction::Mean),
            Err(AnalysisError::Configuration(_))
        ));
    }
}
