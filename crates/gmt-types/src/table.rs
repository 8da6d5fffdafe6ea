//! Tables of named, typed, equal-length columns.

use crate::{ContainerError, DType};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Values of one column.
///
/// A closed set: the marshaling layer matches on every variant, so adding
/// one is a compile error until it is handled there.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Text(Vec<String>),
    DateTime(Vec<NaiveDateTime>),
}

macro_rules! each_variant {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ColumnData::Int8($v) => $body,
            ColumnData::Int16($v) => $body,
            ColumnData::Int32($v) => $body,
            ColumnData::Int64($v) => $body,
            ColumnData::UInt8($v) => $body,
            ColumnData::UInt16($v) => $body,
            ColumnData::UInt32($v) => $body,
            ColumnData::UInt64($v) => $body,
            ColumnData::Float32($v) => $body,
            ColumnData::Float64($v) => $body,
            ColumnData::Text($v) => $body,
            ColumnData::DateTime($v) => $body,
        }
    };
}

impl ColumnData {
    /// Element type of the column.
    pub fn dtype(&self) -> DType {
        match self {
            ColumnData::Int8(_) => DType::Int8,
            ColumnData::Int16(_) => DType::Int16,
            ColumnData::Int32(_) => DType::Int32,
            ColumnData::Int64(_) => DType::Int64,
            ColumnData::UInt8(_) => DType::UInt8,
            ColumnData::UInt16(_) => DType::UInt16,
            ColumnData::UInt32(_) => DType::UInt32,
            ColumnData::UInt64(_) => DType::UInt64,
            ColumnData::Float32(_) => DType::Float32,
            ColumnData::Float64(_) => DType::Float64,
            ColumnData::Text(_) => DType::Text,
            ColumnData::DateTime(_) => DType::DateTime,
        }
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        each_variant!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// An empty column of the given type.
    pub fn empty(dtype: DType) -> Self {
        match dtype {
            DType::Int8 => ColumnData::Int8(Vec::new()),
            DType::Int16 => ColumnData::Int16(Vec::new()),
            DType::Int32 => ColumnData::Int32(Vec::new()),
            DType::Int64 => ColumnData::Int64(Vec::new()),
            DType::UInt8 => ColumnData::UInt8(Vec::new()),
            DType::UInt16 => ColumnData::UInt16(Vec::new()),
            DType::UInt32 => ColumnData::UInt32(Vec::new()),
            DType::UInt64 => ColumnData::UInt64(Vec::new()),
            DType::Float32 => ColumnData::Float32(Vec::new()),
            DType::Float64 => ColumnData::Float64(Vec::new()),
            DType::Text => ColumnData::Text(Vec::new()),
            DType::DateTime => ColumnData::DateTime(Vec::new()),
        }
    }

    /// Value at `index` as `f64`, for numeric columns.
    ///
    /// 64-bit integers beyond 2^53 lose precision here; callers that care
    /// check magnitudes first.
    pub fn value_f64(&self, index: usize) -> Option<f64> {
        match self {
            ColumnData::Int8(v) => v.get(index).map(|&x| f64::from(x)),
            ColumnData::Int16(v) => v.get(index).map(|&x| f64::from(x)),
            ColumnData::Int32(v) => v.get(index).map(|&x| f64::from(x)),
            ColumnData::Int64(v) => v.get(index).map(|&x| x as f64),
            ColumnData::UInt8(v) => v.get(index).map(|&x| f64::from(x)),
            ColumnData::UInt16(v) => v.get(index).map(|&x| f64::from(x)),
            ColumnData::UInt32(v) => v.get(index).map(|&x| f64::from(x)),
            ColumnData::UInt64(v) => v.get(index).map(|&x| x as f64),
            ColumnData::Float32(v) => v.get(index).map(|&x| f64::from(x)),
            ColumnData::Float64(v) => v.get(index).copied(),
            ColumnData::Text(_) | ColumnData::DateTime(_) => None,
        }
    }
}

macro_rules! impl_from_vec {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<Vec<$ty>> for ColumnData {
                fn from(values: Vec<$ty>) -> Self {
                    ColumnData::$variant(values)
                }
            }
        )*
    };
}

impl_from_vec! {
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
    String => Text,
    NaiveDateTime => DateTime,
}

impl From<Vec<&str>> for ColumnData {
    fn from(values: Vec<&str>) -> Self {
        ColumnData::Text(values.into_iter().map(str::to_string).collect())
    }
}

/// A named column with an optional validity mask.
///
/// `validity[i] == false` marks row `i` as missing. Floating point columns
/// may also carry NaN directly.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
    pub validity: Option<Vec<bool>>,
}

impl Column {
    pub fn new(name: impl Into<String>, data: impl Into<ColumnData>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            validity: None,
        }
    }

    /// Attaches a validity mask.
    pub fn with_validity(mut self, validity: Vec<bool>) -> Self {
        self.validity = Some(validity);
        self
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns false when row `index` is masked out.
    pub fn is_valid(&self, index: usize) -> bool {
        self.validity
            .as_ref()
            .map_or(true, |mask| mask.get(index).copied().unwrap_or(false))
    }

    /// Number of masked-out rows.
    pub fn null_count(&self) -> usize {
        self.validity
            .as_ref()
            .map_or(0, |mask| mask.iter().filter(|valid| !**valid).count())
    }
}

/// An ordered set of columns.
///
/// Construction does not validate; [`Table::validate`] does, and the bridge
/// calls it before any data reaches the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Appends a column without a validity mask.
    pub fn with_column(mut self, name: impl Into<String>, data: impl Into<ColumnData>) -> Self {
        self.columns.push(Column::new(name, data));
        self
    }

    /// Checks equal column lengths, mask lengths and unique names.
    ///
    /// Returns the common row count.
    pub fn validate(&self) -> Result<usize, ContainerError> {
        let expected = self.columns.first().map_or(0, Column::len);
        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(ContainerError::DuplicateColumn(column.name.clone()));
            }
            if column.len() != expected {
                return Err(ContainerError::ColumnLength {
                    column: column.name.clone(),
                    expected,
                    found: column.len(),
                });
            }
            if let Some(mask) = &column.validity {
                if mask.len() != expected {
                    return Err(ContainerError::DataLength {
                        what: "validity mask",
                        expected,
                        found: mask.len(),
                    });
                }
            }
        }
        Ok(expected)
    }

    /// Row count of the first column (0 for a table without columns).
    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows() == 0
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Names and types of the columns.
    pub fn schema(&self) -> TableSchema {
        TableSchema {
            columns: self
                .columns
                .iter()
                .map(|c| ColumnSpec {
                    name: c.name.clone(),
                    dtype: c.dtype(),
                })
                .collect(),
        }
    }
}

/// Name and type of one expected column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub dtype: DType,
}

/// Expected layout of a table read back from the engine.
///
/// The engine returns datasets as double-precision columns followed by an
/// optional trailing text column; a schema restores host names and types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnSpec>,
}

impl TableSchema {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = (S, DType)>,
        S: Into<String>,
    {
        Self {
            columns: columns
                .into_iter()
                .map(|(name, dtype)| ColumnSpec {
                    name: name.into(),
                    dtype,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Columns stored numerically by the engine (everything but text).
    pub fn numeric_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| c.dtype != DType::Text)
    }

    /// Columns stored in the engine's trailing text.
    pub fn text_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| c.dtype == DType::Text)
    }
}
