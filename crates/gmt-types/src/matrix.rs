//! Homogeneous 2-D numeric arrays.

use crate::{ColumnData, ContainerError, DType};

/// A row-major matrix of one numeric type.
///
/// Handed to the engine as a dataset whose columns are the matrix columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    pub data: ColumnData,
    pub n_rows: usize,
    pub n_columns: usize,
}

impl Matrix {
    pub fn new(data: impl Into<ColumnData>, n_rows: usize, n_columns: usize) -> Result<Self, ContainerError> {
        let matrix = Self {
            data: data.into(),
            n_rows,
            n_columns,
        };
        matrix.validate()?;
        Ok(matrix)
    }

    /// Builds a matrix from equally long rows.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, ContainerError> {
        let n_columns = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().find(|row| row.len() != n_columns) {
            return Err(ContainerError::DataLength {
                what: "matrix row",
                expected: n_columns,
                found: bad.len(),
            });
        }
        let data: Vec<f64> = rows.iter().flatten().copied().collect();
        Self::new(data, rows.len(), n_columns)
    }

    /// Checks the element type and sample count.
    pub fn validate(&self) -> Result<(), ContainerError> {
        let dtype = self.data.dtype();
        if !dtype.is_numeric() {
            return Err(ContainerError::UnsupportedDType {
                column: "matrix".to_string(),
                dtype,
                reason: "matrices hold numeric values only".to_string(),
            });
        }
        let expected = self.n_rows * self.n_columns;
        if self.data.len() != expected {
            return Err(ContainerError::DataLength {
                what: "matrix samples",
                expected,
                found: self.data.len(),
            });
        }
        Ok(())
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.n_columns)
    }

    pub fn get_f64(&self, row: usize, column: usize) -> Option<f64> {
        if row >= self.n_rows || column >= self.n_columns {
            return None;
        }
        self.data.value_f64(row * self.n_columns + column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows() {
        let matrix = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
        assert_eq!(matrix.shape(), (3, 2));
        assert_eq!(matrix.get_f64(2, 1), Some(6.0));
        assert_eq!(matrix.get_f64(3, 0), None);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, ContainerError::DataLength { what: "matrix row", .. }));
    }

    #[test]
    fn test_text_matrix_rejected() {
        let err = Matrix::new(vec!["a", "b"], 1, 2).unwrap_err();
        assert!(matches!(err, ContainerError::UnsupportedDType { dtype: DType::Text, .. }));
    }

    #[test]
    fn test_integer_matrix() {
        let matrix = Matrix::new(vec![1i32, 2, 3, 4], 2, 2).unwrap();
        assert_eq!(matrix.dtype(), DType::Int32);
    }
}
