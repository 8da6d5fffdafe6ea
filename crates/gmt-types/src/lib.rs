//! Host-side containers exchanged with the GMT engine.
//!
//! - [`Table`]: named, typed, equal-length columns
//! - [`Matrix`]: a homogeneous numeric 2-D array
//! - [`Grid`]: single-precision samples with a region/spacing header
//! - [`Image`]: 8-bit gray, RGB or RGBA rasters
//!
//! Containers are plain data; [`Container`] is the closed set the bridge
//! marshals.

mod dtype;
mod grid;
mod image;
mod matrix;
mod region;
mod table;

pub use dtype::DType;
pub use grid::{Axis, Grid};
pub use image::Image;
pub use matrix::Matrix;
pub use region::{Increments, Region, Registration};
pub use table::{Column, ColumnData, ColumnSpec, Table, TableSchema};

use std::fmt;

/// Validation failures of host containers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ContainerError {
    #[error("column '{column}' has {found} rows, expected {expected}")]
    ColumnLength {
        column: String,
        expected: usize,
        found: usize,
    },

    #[error("{what}: expected {expected} values, found {found}")]
    DataLength {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("duplicate column name '{0}'")]
    DuplicateColumn(String),

    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("column '{column}' of type {dtype}: {reason}")]
    UnsupportedDType {
        column: String,
        dtype: DType,
        reason: String,
    },

    #[error("sample {index} ({value}) is not exactly representable as f32")]
    InexactValue { index: usize, value: f64 },

    #[error("unknown data type '{0}'")]
    UnknownDType(String),
}

/// Which family a container belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Table,
    Matrix,
    Grid,
    Image,
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::Table => write!(f, "table"),
            ContainerKind::Matrix => write!(f, "matrix"),
            ContainerKind::Grid => write!(f, "grid"),
            ContainerKind::Image => write!(f, "image"),
        }
    }
}

/// Any container the bridge can hand to, or receive from, the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Container {
    Table(Table),
    Matrix(Matrix),
    Grid(Grid),
    Image(Image),
}

impl Container {
    pub fn kind(&self) -> ContainerKind {
        match self {
            Container::Table(_) => ContainerKind::Table,
            Container::Matrix(_) => ContainerKind::Matrix,
            Container::Grid(_) => ContainerKind::Grid,
            Container::Image(_) => ContainerKind::Image,
        }
    }

    pub fn into_table(self) -> Option<Table> {
        match self {
            Container::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn into_grid(self) -> Option<Grid> {
        match self {
            Container::Grid(grid) => Some(grid),
            _ => None,
        }
    }

    pub fn into_image(self) -> Option<Image> {
        match self {
            Container::Image(image) => Some(image),
            _ => None,
        }
    }
}

impl From<Table> for Container {
    fn from(table: Table) -> Self {
        Container::Table(table)
    }
}

impl From<Matrix> for Container {
    fn from(matrix: Matrix) -> Self {
        Container::Matrix(matrix)
    }
}

impl From<Grid> for Container {
    fn from(grid: Grid) -> Self {
        Container::Grid(grid)
    }
}

impl From<Image> for Container {
    fn from(image: Image) -> Self {
        Container::Image(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_kind() {
        let table: Container = Table::default().with_column("x", vec![1.0]).into();
        assert_eq!(table.kind(), ContainerKind::Table);
        assert_eq!(table.kind().to_string(), "table");
        assert!(table.into_grid().is_none());
    }

    #[test]
    fn test_error_messages() {
        let err = ContainerError::ColumnLength {
            column: "y".to_string(),
            expected: 3,
            found: 2,
        };
        assert_eq!(err.to_string(), "column 'y' has 2 rows, expected 3");
    }
}
