//! Conversion between host containers and native GMT containers.
//!
//! `to_native_*` functions validate first and only then touch the engine,
//! so validation errors never reach native code. `from_native_*` functions
//! walk engine-owned memory and copy it into host containers.

pub(crate) mod grid;
pub(crate) mod image;
pub(crate) mod matrix;
pub(crate) mod table;

use gmt_types::{ColumnData, DType};

use crate::error::{BridgeError, BridgeResult};
use crate::session::{NativeObject, Session};
use crate::virtualfile::{HostBuffer, InputRef, MarshalWarning};

/// A native input container ready to be opened as a virtual file.
pub(crate) struct PreparedInput<'s> {
    pub family: &'static str,
    pub geometry: &'static str,
    pub object: NativeObject<'s>,
    pub buffers: Vec<HostBuffer>,
    pub warnings: Vec<MarshalWarning>,
}

/// Builds the native container for any input.
pub(crate) fn prepare_input<'s>(session: &'s Session, input: InputRef<'_>) -> BridgeResult<PreparedInput<'s>> {
    match input {
        InputRef::Table(table) => table::to_native_table(session, table),
        InputRef::Matrix(matrix) => matrix::to_native_matrix(session, matrix),
        InputRef::Grid(grid) => grid::to_native_grid(session, grid),
        InputRef::Image(image) => image::to_native_image(session, image),
    }
}

/// Native element type with the same width and signedness as `dtype`.
pub(crate) fn native_type_name(dtype: DType) -> &'static str {
    match dtype {
        DType::Int8 => "GMT_CHAR",
        DType::UInt8 => "GMT_UCHAR",
        DType::Int16 => "GMT_SHORT",
        DType::UInt16 => "GMT_USHORT",
        DType::Int32 => "GMT_INT",
        DType::UInt32 => "GMT_UINT",
        DType::Int64 => "GMT_LONG",
        DType::UInt64 => "GMT_ULONG",
        DType::Float32 => "GMT_FLOAT",
        DType::Float64 => "GMT_DOUBLE",
        DType::Text | DType::DateTime => "GMT_TEXT",
    }
}

/// Pointer to the values of a numeric column, for zero-copy hand-off.
///
/// The engine only reads through it.
pub(crate) fn numeric_ptr(data: &ColumnData) -> Option<*mut std::ffi::c_void> {
    let ptr: *const std::ffi::c_void = match data {
        ColumnData::Int8(v) => v.as_ptr().cast(),
        ColumnData::Int16(v) => v.as_ptr().cast(),
        ColumnData::Int32(v) => v.as_ptr().cast(),
        ColumnData::Int64(v) => v.as_ptr().cast(),
        ColumnData::UInt8(v) => v.as_ptr().cast(),
        ColumnData::UInt16(v) => v.as_ptr().cast(),
        ColumnData::UInt32(v) => v.as_ptr().cast(),
        ColumnData::UInt64(v) => v.as_ptr().cast(),
        ColumnData::Float32(v) => v.as_ptr().cast(),
        ColumnData::Float64(v) => v.as_ptr().cast(),
        ColumnData::Text(_) | ColumnData::DateTime(_) => return None,
    };
    Some(ptr.cast_mut())
}

/// Rejects 64-bit integers the engine's double-precision path would round.
pub(crate) fn check_integer_range(
    name: &str,
    data: &ColumnData,
    valid: impl Fn(usize) -> bool,
    limit: u64,
) -> BridgeResult<()> {
    let offending = match data {
        ColumnData::Int64(values) => values
            .iter()
            .enumerate()
            .find(|(i, v)| valid(*i) && v.unsigned_abs() > limit)
            .map(|(i, v)| (i, v.to_string())),
        ColumnData::UInt64(values) => values
            .iter()
            .enumerate()
            .find(|(i, v)| valid(*i) && **v > limit)
            .map(|(i, v)| (i, v.to_string())),
        _ => None,
    };
    match offending {
        Some((row, value)) => Err(BridgeError::unsupported_dtype(
            name,
            data.dtype(),
            format!(
                "value {} in row {} exceeds the largest exactly representable magnitude {}",
                value, row, limit
            ),
        )),
        None => Ok(()),
    }
}

/// Borrows `len` elements at `ptr`, treating a null pointer as empty.
///
/// # Safety
///
/// When non-null, `ptr` must point to `len` initialized values that stay
/// valid for `'a`.
pub(crate) unsafe fn native_slice<'a, T>(ptr: *const T, len: usize) -> Option<&'a [T]> {
    if len == 0 {
        return Some(&[]);
    }
    if ptr.is_null() {
        return None;
    }
    Some(std::slice::from_raw_parts(ptr, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_type_names() {
        assert_eq!(native_type_name(DType::Int8), "GMT_CHAR");
        assert_eq!(native_type_name(DType::UInt64), "GMT_ULONG");
        assert_eq!(native_type_name(DType::Float32), "GMT_FLOAT");
        assert_eq!(native_type_name(DType::DateTime), "GMT_TEXT");
    }

    #[test]
    fn test_numeric_ptr_points_at_column_values() {
        let values = ColumnData::Float64(vec![1.5, 2.5]);
        let ColumnData::Float64(inner) = &values else {
            unreachable!()
        };
        let ptr = numeric_ptr(&values).unwrap();
        assert_eq!(ptr as *const f64, inner.as_ptr());

        let bytes = ColumnData::UInt8(vec![7]);
        assert_eq!(unsafe { *(numeric_ptr(&bytes).unwrap() as *const u8) }, 7);
        assert!(numeric_ptr(&ColumnData::from(vec!["a"])).is_none());
    }

    #[test]
    fn test_integer_range() {
        let limit = 1u64 << 53;
        let ok = ColumnData::Int64(vec![-(1i64 << 53), 1 << 53]);
        assert!(check_integer_range("n", &ok, |_| true, limit).is_ok());

        let big = ColumnData::Int64(vec![1, i64::MAX]);
        let err = check_integer_range("n", &big, |_| true, limit).unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedDType { dtype: DType::Int64, .. }));
        assert!(err.to_string().contains("row 1"));

        // masked-out rows are not checked
        assert!(check_integer_range("n", &big, |i| i == 0, limit).is_ok());

        let unsigned = ColumnData::UInt64(vec![u64::MAX]);
        assert!(check_integer_range("u", &unsigned, |_| true, limit).is_err());
    }

    #[test]
    fn test_native_slice() {
        let values = [1.0f64, 2.0];
        assert_eq!(unsafe { native_slice(values.as_ptr(), 2) }, Some(&values[..]));
        assert_eq!(unsafe { native_slice::<f64>(std::ptr::null(), 0) }, Some(&[][..]));
        assert_eq!(unsafe { native_slice::<f64>(std::ptr::null(), 3) }, None);
    }
}
