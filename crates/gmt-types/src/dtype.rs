//! Column element types.

use crate::ContainerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Element type of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Text,
    DateTime,
}

impl DType {
    /// All element types, numeric ones first.
    pub const ALL: [DType; 12] = [
        DType::Int8,
        DType::Int16,
        DType::Int32,
        DType::Int64,
        DType::UInt8,
        DType::UInt16,
        DType::UInt32,
        DType::UInt64,
        DType::Float32,
        DType::Float64,
        DType::Text,
        DType::DateTime,
    ];

    /// Returns true for integer and floating point types.
    pub const fn is_numeric(&self) -> bool {
        !matches!(self, DType::Text | DType::DateTime)
    }

    /// Returns true for signed and unsigned integer types.
    pub const fn is_integer(&self) -> bool {
        matches!(
            self,
            DType::Int8
                | DType::Int16
                | DType::Int32
                | DType::Int64
                | DType::UInt8
                | DType::UInt16
                | DType::UInt32
                | DType::UInt64
        )
    }

    /// Returns true for `Float32` and `Float64`.
    pub const fn is_float(&self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }

    /// Size in bytes of one element, for fixed-width types.
    pub const fn width(&self) -> Option<usize> {
        match self {
            DType::Int8 | DType::UInt8 => Some(1),
            DType::Int16 | DType::UInt16 => Some(2),
            DType::Int32 | DType::UInt32 | DType::Float32 => Some(4),
            DType::Int64 | DType::UInt64 | DType::Float64 => Some(8),
            DType::Text | DType::DateTime => None,
        }
    }

    /// Lower-case name, as used in schemas and config files.
    pub const fn name(&self) -> &'static str {
        match self {
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::UInt8 => "uint8",
            DType::UInt16 => "uint16",
            DType::UInt32 => "uint32",
            DType::UInt64 => "uint64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Text => "text",
            DType::DateTime => "datetime",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = ContainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        DType::ALL
            .iter()
            .copied()
            .find(|dtype| dtype.name() == lower)
            .ok_or_else(|| ContainerError::UnknownDType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(DType::Int64.is_integer());
        assert!(DType::Int64.is_numeric());
        assert!(!DType::Float32.is_integer());
        assert!(DType::Float32.is_float());
        assert!(!DType::Text.is_numeric());
        assert!(!DType::DateTime.is_numeric());
    }

    #[test]
    fn test_width() {
        assert_eq!(DType::UInt8.width(), Some(1));
        assert_eq!(DType::Int16.width(), Some(2));
        assert_eq!(DType::Float32.width(), Some(4));
        assert_eq!(DType::UInt64.width(), Some(8));
        assert_eq!(DType::Text.width(), None);
    }

    #[test]
    fn test_parse_names() {
        for dtype in DType::ALL {
            assert_eq!(dtype.name().parse::<DType>().unwrap(), dtype);
        }
        assert_eq!("Float64".parse::<DType>().unwrap(), DType::Float64);
        assert!("complex128".parse::<DType>().is_err());
    }
}
