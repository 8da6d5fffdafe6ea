//! Regular 2-D grids of single-precision samples.

use crate::{ContainerError, Increments, Region, Registration};
use std::fmt;

/// A grid axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "x"),
            Axis::Y => write!(f, "y"),
        }
    }
}

/// Maximum distance between the node count implied by region and spacing
/// and the actual count.
const SHAPE_SLOP: f64 = 1e-4;

/// A grid of `f32` samples with its header.
///
/// Samples are row-major with row 0 at the north edge, which is how the
/// engine stores grids in memory. Use [`Grid::from_south_up`] for data
/// whose first row is the southern one.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    pub data: Vec<f32>,
    pub n_rows: usize,
    pub n_columns: usize,
    pub region: Region,
    pub increments: Increments,
    pub registration: Registration,
    /// Sentinel marking missing samples, when the data uses one instead of
    /// NaN.
    pub nodata: Option<f32>,
    /// Explicit node x coordinates, west to east.
    pub x: Option<Vec<f64>>,
    /// Explicit node y coordinates, matching row order (north first).
    pub y: Option<Vec<f64>>,
    pub title: String,
}

impl Grid {
    /// Creates and validates a grid.
    pub fn new(
        data: Vec<f32>,
        n_rows: usize,
        n_columns: usize,
        region: Region,
        increments: Increments,
        registration: Registration,
    ) -> Result<Self, ContainerError> {
        let grid = Self {
            data,
            n_rows,
            n_columns,
            region,
            increments,
            registration,
            nodata: None,
            x: None,
            y: None,
            title: String::new(),
        };
        grid.validate()?;
        Ok(grid)
    }

    /// Creates a grid whose shape is implied by region and spacing.
    pub fn from_region(
        data: Vec<f32>,
        region: Region,
        increments: Increments,
        registration: Registration,
    ) -> Result<Self, ContainerError> {
        check_spacing(&region, &increments)?;
        let n_columns = registration
            .nodes_for(region.width(), increments.x)
            .round()
            .max(0.0) as usize;
        let n_rows = registration
            .nodes_for(region.height(), increments.y)
            .round()
            .max(0.0) as usize;
        Self::new(data, n_rows, n_columns, region, increments, registration)
    }

    /// Creates a grid from rows ordered south to north.
    pub fn from_south_up(
        data: Vec<f32>,
        n_rows: usize,
        n_columns: usize,
        region: Region,
        increments: Increments,
        registration: Registration,
    ) -> Result<Self, ContainerError> {
        if data.len() != n_rows * n_columns {
            return Err(ContainerError::DataLength {
                what: "grid samples",
                expected: n_rows * n_columns,
                found: data.len(),
            });
        }
        let flipped = if n_columns == 0 {
            data
        } else {
            data.chunks(n_columns).rev().flatten().copied().collect()
        };
        Self::new(flipped, n_rows, n_columns, region, increments, registration)
    }

    /// Creates a grid from double-precision samples.
    ///
    /// Every finite value must be exactly representable as `f32`; NaN and
    /// the infinities pass through.
    pub fn from_f64(
        data: &[f64],
        n_rows: usize,
        n_columns: usize,
        region: Region,
        increments: Increments,
        registration: Registration,
    ) -> Result<Self, ContainerError> {
        let mut samples = Vec::with_capacity(data.len());
        for (index, &value) in data.iter().enumerate() {
            let narrowed = value as f32;
            if value.is_finite() && f64::from(narrowed) != value {
                return Err(ContainerError::InexactValue { index, value });
            }
            samples.push(narrowed);
        }
        Self::new(samples, n_rows, n_columns, region, increments, registration)
    }

    /// A grid with no nodes.
    pub fn empty(region: Region, increments: Increments, registration: Registration) -> Self {
        Self {
            data: Vec::new(),
            n_rows: 0,
            n_columns: 0,
            region,
            increments,
            registration,
            nodata: None,
            x: None,
            y: None,
            title: String::new(),
        }
    }

    pub fn with_nodata(mut self, sentinel: f32) -> Self {
        self.nodata = Some(sentinel);
        self
    }

    /// Attaches explicit node coordinates.
    pub fn with_coordinates(mut self, x: Vec<f64>, y: Vec<f64>) -> Self {
        self.x = Some(x);
        self.y = Some(y);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Checks sample count, spacing, region/shape agreement and coordinate
    /// lengths.
    pub fn validate(&self) -> Result<(), ContainerError> {
        if self.data.len() != self.n_rows * self.n_columns {
            return Err(ContainerError::DataLength {
                what: "grid samples",
                expected: self.n_rows * self.n_columns,
                found: self.data.len(),
            });
        }
        check_spacing(&self.region, &self.increments)?;
        if !self.is_empty() {
            check_shape(&self.region, &self.increments, self.registration, self.n_rows, self.n_columns)?;
        }
        if let Some(x) = &self.x {
            if x.len() != self.n_columns {
                return Err(ContainerError::DataLength {
                    what: "x coordinates",
                    expected: self.n_columns,
                    found: x.len(),
                });
            }
        }
        if let Some(y) = &self.y {
            if y.len() != self.n_rows {
                return Err(ContainerError::DataLength {
                    what: "y coordinates",
                    expected: self.n_rows,
                    found: y.len(),
                });
            }
        }
        if self.nodata.is_some_and(f32::is_nan) {
            return Err(ContainerError::InvalidGrid(
                "no-data sentinel must not be NaN".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0 || self.n_columns == 0
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.n_columns)
    }

    pub fn get(&self, row: usize, column: usize) -> Option<f32> {
        if row >= self.n_rows || column >= self.n_columns {
            return None;
        }
        self.data.get(row * self.n_columns + column).copied()
    }

    pub fn row(&self, row: usize) -> Option<&[f32]> {
        if row >= self.n_rows {
            return None;
        }
        let start = row * self.n_columns;
        self.data.get(start..start + self.n_columns)
    }

    /// Node x coordinates: explicit ones, or derived from the header.
    pub fn x_coords(&self) -> Vec<f64> {
        if let Some(x) = &self.x {
            return x.clone();
        }
        let offset = self.registration.node_offset();
        (0..self.n_columns)
            .map(|i| self.region.west + (i as f64 + offset) * self.increments.x)
            .collect()
    }

    /// Node y coordinates in row order (north first).
    pub fn y_coords(&self) -> Vec<f64> {
        if let Some(y) = &self.y {
            return y.clone();
        }
        let offset = self.registration.node_offset();
        (0..self.n_rows)
            .map(|j| self.region.north - (j as f64 + offset) * self.increments.y)
            .collect()
    }

    /// Axes whose explicit coordinates are not evenly spaced.
    ///
    /// `tolerance` is relative to the mean spacing.
    pub fn irregular_axes(&self, tolerance: f64) -> Vec<Axis> {
        let mut axes = Vec::new();
        if self.x.as_deref().is_some_and(|x| !evenly_spaced(x, tolerance)) {
            axes.push(Axis::X);
        }
        if self.y.as_deref().is_some_and(|y| !evenly_spaced(y, tolerance)) {
            axes.push(Axis::Y);
        }
        axes
    }

    /// Minimum and maximum sample, ignoring NaN and the sentinel.
    pub fn z_range(&self) -> Option<(f32, f32)> {
        self.data
            .iter()
            .copied()
            .filter(|v| !v.is_nan() && Some(*v) != self.nodata)
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

fn check_spacing(region: &Region, increments: &Increments) -> Result<(), ContainerError> {
    for (axis, inc) in [(Axis::X, increments.x), (Axis::Y, increments.y)] {
        if !(inc.is_finite() && inc > 0.0) {
            return Err(ContainerError::InvalidGrid(format!(
                "{} increment must be positive and finite, got {}",
                axis, inc
            )));
        }
    }
    if !region.is_valid() {
        return Err(ContainerError::InvalidGrid(format!("invalid region {}", region)));
    }
    Ok(())
}

/// Checks that region, spacing and registration imply the given shape.
pub(crate) fn check_shape(
    region: &Region,
    increments: &Increments,
    registration: Registration,
    n_rows: usize,
    n_columns: usize,
) -> Result<(), ContainerError> {
    for (axis, extent, inc, actual) in [
        (Axis::X, region.width(), increments.x, n_columns),
        (Axis::Y, region.height(), increments.y, n_rows),
    ] {
        let implied = registration.nodes_for(extent, inc);
        if (implied - actual as f64).abs() > SHAPE_SLOP * implied.abs().max(1.0) {
            return Err(ContainerError::InvalidGrid(format!(
                "{} registration over {} with {} increment {} implies {} nodes along {}, data has {}",
                registration, region, axis, inc, implied, axis, actual
            )));
        }
    }
    Ok(())
}

fn evenly_spaced(coords: &[f64], tolerance: f64) -> bool {
    if coords.len() < 3 {
        return true;
    }
    let mean = (coords[coords.len() - 1] - coords[0]) / (coords.len() - 1) as f64;
    let limit = tolerance * mean.abs();
    coords
        .windows(2)
        .all(|pair| ((pair[1] - pair[0]) - mean).abs() <= limit)
}
