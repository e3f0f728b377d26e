//! Target matrices
//!
//! A [`TargetMatrix`] holds per-target metrics on a fixed angular lattice, one
//! 2D grid per depth plane and measure. Columns run along x (ascending), rows
//! along y (descending, so row 0 is the top of the visual field). Missing cells
//! are `NaN`, written as `null` in JSON.

use crate::error::AnalysisError;
use ndarray::Array2;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Grids of one measure, keyed by depth plane
pub type DepthGrids = BTreeMap<DepthPlane, Array2<f64>>;

/// The four per-target measures stored in a matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    Accuracy,
    Sd,
    Rmsi,
    Repeated,
}

impl Measure {
    pub const ALL: [Measure; 4] = [
        Measure::Accuracy,
        Measure::Sd,
        Measure::Rmsi,
        Measure::Repeated,
    ];

    /// Interchange key
    pub fn key(&self) -> &'static str {
        match self {
            Measure::Accuracy => "acc",
            Measure::Sd => "sd",
            Measure::Rmsi => "rmsi",
            Measure::Repeated => "rep",
        }
    }
}

/// Depth of a target plane (meters), usable as a map key.
///
/// Planes compare by exact value.
#[derive(Debug, Clone, Copy)]
pub struct DepthPlane(f64);

impl DepthPlane {
    pub fn new(depth: f64) -> Self {
        Self(depth)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl PartialEq for DepthPlane {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DepthPlane {}

impl PartialOrd for DepthPlane {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DepthPlane {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for DepthPlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for DepthPlane {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DepthPlane {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<f64>()
            .map(DepthPlane)
            .map_err(|e| serde::de::Error::custom(format!("invalid depth plane '{raw}': {e}")))
    }
}

/// Largest lattice (rows × columns) a matrix may span
pub const MAX_LATTICE_CELLS: usize = 1_000_000;

/// Lattice coordinates along one axis: `min + k * grid` up to and including
/// the first value not below `max`.
pub fn lattice_axis(min: f64, max: f64, grid: f64) -> Result<Vec<f64>, AnalysisError> {
    let count = lattice_len(min, max, grid)?;
    Ok((0..count).map(|k| min + k as f64 * grid).collect())
}

fn lattice_len(min: f64, max: f64, grid: f64) -> Result<usize, AnalysisError> {
    if !(grid.is_finite() && grid > 0.0) {
        return Err(AnalysisError::Configuration(format!(
            "grid spacing must be a positive angle, got {grid}"
        )));
    }
    if !(min.is_finite() && max.is_finite()) || min > max {
        return Err(AnalysisError::Configuration(format!(
            "invalid extent ({min}, {max})"
        )));
    }
    let count = ((max - min + grid) / grid).ceil();
    if !count.is_finite() || count > MAX_LATTICE_CELLS as f64 {
        return Err(AnalysisError::Configuration(format!(
            "a {grid}° grid over ({min}, {max}) exceeds {MAX_LATTICE_CELLS} cells"
        )));
    }
    Ok(count as usize)
}

/// Spatially binned per-target metrics of one session, or an aggregate of many
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetMatrix {
    /// Horizontal extent (min, max), degrees
    pub x_range: (f64, f64),
    /// Vertical extent (min, max), degrees
    pub y_range: (f64, f64),
    /// Lattice spacing, degrees
    pub grid: f64,
    /// Source session; absent on aggregates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_id: Option<String>,
    /// Number of session matrices combined
    pub n: usize,
    #[serde(with = "grid_serde")]
    pub acc: DepthGrids,
    #[serde(with = "grid_serde")]
    pub sd: DepthGrids,
    #[serde(with = "grid_serde")]
    pub rmsi: DepthGrids,
    #[serde(with = "grid_serde")]
    pub rep: DepthGrids,
}

impl TargetMatrix {
    /// Empty matrix (no depth planes) for the given geometry
    pub fn empty(x_range: (f64, f64), y_range: (f64, f64), grid: f64) -> Self {
        Self {
            x_range,
            y_range,
            grid,
            val_id: None,
            n: 1,
            acc: DepthGrids::new(),
            sd: DepthGrids::new(),
            rmsi: DepthGrids::new(),
            rep: DepthGrids::new(),
        }
    }

    pub fn measure(&self, measure: Measure) -> &DepthGrids {
        match measure {
            Measure::Accuracy => &self.acc,
            Measure::Sd => &self.sd,
            Measure::Rmsi => &self.rmsi,
            Measure::Repeated => &self.rep,
        }
    }

    pub fn measure_mut(&mut self, measure: Measure) -> &mut DepthGrids {
        match measure {
            Measure::Accuracy => &mut self.acc,
            Measure::Sd => &mut self.sd,
            Measure::Rmsi => &mut self.rmsi,
            Measure::Repeated => &mut self.rep,
        }
    }

    /// Depth planes present in any measure, ascending
    pub fn depths(&self) -> Vec<DepthPlane> {
        let mut depths: Vec<DepthPlane> = Measure::ALL
            .iter()
            .flat_map(|m| self.measure(*m).keys().copied())
            .collect();
        depths.sort();
        depths.dedup();
        depths
    }

    /// Column coordinates (x, ascending)
    pub fn x_axis(&self) -> Result<Vec<f64>, AnalysisError> {
        lattice_axis(self.x_range.0, self.x_range.1, self.grid)
    }

    /// Row coordinates (y, descending)
    pub fn y_axis(&self) -> Result<Vec<f64>, AnalysisError> {
        let mut axis = lattice_axis(self.y_range.0, self.y_range.1, self.grid)?;
        axis.reverse();
        Ok(axis)
    }

    /// Grid shape as (rows, columns).
    ///
    /// Fails on a bad extent or spacing, or a lattice above [`MAX_LATTICE_CELLS`].
    pub fn shape(&self) -> Result<(usize, usize), AnalysisError> {
        let rows = lattice_len(self.y_range.0, self.y_range.1, self.grid)?;
        let cols = lattice_len(self.x_range.0, self.x_range.1, self.grid)?;
        match rows.checked_mul(cols) {
            Some(cells) if cells <= MAX_LATTICE_CELLS => Ok((rows, cols)),
            _ => Err(AnalysisError::Configuration(format!(
                "a {rows}x{cols} lattice exceeds {MAX_LATTICE_CELLS} cells"
            ))),
        }
    }

    /// Check the geometry and that every grid has the lattice's shape.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        let shape = self.shape()?;
        for measure in Measure::ALL {
            for (depth, grid) in self.measure(measure) {
                if grid.dim() != shape {
                    return Err(AnalysisError::Configuration(format!(
                        "{} grid at depth {depth} has shape {:?}, lattice is {:?}",
                        measure.key(),
                        grid.dim(),
                        shape
                    )));
                }
            }
        }
        Ok(())
    }

    /// Cell index of an exact lattice coordinate
    pub fn cell_index(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let col = self.x_axis().ok()?.iter().position(|v| *v == x)?;
        let row = self.y_axis().ok()?.iter().position(|v| *v == y)?;
        Some((row, col))
    }

    /// Value at an exact lattice coordinate; `None` if missing or off-lattice
    pub fn value_at(&self, measure: Measure, depth: f64, x: f64, y: f64) -> Option<f64> {
        let (row, col) = self.cell_index(x, y)?;
        let grid = self.measure(measure).get(&DepthPlane::new(depth))?;
        let value = *grid.get((row, col))?;
        if value.is_nan() {
            None
        } else {
            Some(value)
        }
    }

    /// An all-missing grid with this matrix's shape
    pub fn missing_grid(&self) -> Result<Array2<f64>, AnalysisError> {
        Ok(Array2::from_elem(self.shape()?, f64::NAN))
    }

    pub fn to_json(&self) -> Result<String, AnalysisError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the interchange form and validate its geometry.
    pub fn from_json(json: &str) -> Result<Self, AnalysisError> {
        let matrix: Self = serde_json::from_str(json)?;
        matrix.validate()?;
        Ok(matrix)
    }
}

/// Grids travel as nested row arrays with `null` for missing cells
mod grid_serde {
    use super::{DepthGrids, DepthPlane};
    use ndarray::Array2;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    type Rows = Vec<Vec<Option<f64>>>;

    pub fn serialize<S: Serializer>(grids: &DepthGrids, serializer: S) -> Result<S::Ok, S::Error> {
        let wire: BTreeMap<DepthPlane, Rows> = grids
            .iter()
            .map(|(depth, grid)| {
                let rows = grid
                    .rows()
                    .into_iter()
                    .map(|row| {
                        row.iter()
                            .map(|v| if v.is_nan() { None } else { Some(*v) })
                            .collect()
                    })
                    .collect();
                (*depth, rows)
            })
            .collect();
        wire.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DepthGrids, D::Error> {
        let wire = BTreeMap::<DepthPlane, Rows>::deserialize(deserializer)?;
        let mut grids = DepthGrids::new();
        for (depth, rows) in wire {
            let n_rows = rows.len();
            let n_cols = rows.first().map_or(0, Vec::len);
            if rows.iter().any(|r| r.len() != n_cols) {
                return Err(D::Error::custom(format!(
                    "grid for depth {depth} is not rectangular"
                )));
            }
            let cells: Vec<f64> = rows
                .into_iter()
                .flatten()
                .map(|v| v.unwrap_or(f64::NAN))
                .collect();
            let grid = Array2::from_shape_vec((n_rows, n_cols), cells)
                .map_err(|e| D::Error::custom(e.to_string()))?;
            grids.insert(depth, grid);
        }
        Ok(grids)
    }
}
