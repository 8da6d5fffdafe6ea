//! Constant table served by `GMT_Get_Enum`.
//!
//! Values match GMT 6 so that traces read the same as against libgmt.

use std::ffi::c_int;

pub(crate) const GMT_IS_DATASET: c_int = 0;
pub(crate) const GMT_IS_GRID: c_int = 1;
pub(crate) const GMT_IS_IMAGE: c_int = 2;
pub(crate) const GMT_IS_MATRIX: c_int = 5;
pub(crate) const GMT_IS_VECTOR: c_int = 6;
pub(crate) const GMT_VIA_VECTOR: c_int = 100;
pub(crate) const GMT_VIA_MATRIX: c_int = 200;

pub(crate) const GMT_OUT: c_int = 1;

pub(crate) const GMT_CHAR: c_int = 0;
pub(crate) const GMT_UCHAR: c_int = 1;
pub(crate) const GMT_SHORT: c_int = 2;
pub(crate) const GMT_USHORT: c_int = 3;
pub(crate) const GMT_INT: c_int = 4;
pub(crate) const GMT_UINT: c_int = 5;
pub(crate) const GMT_LONG: c_int = 6;
pub(crate) const GMT_ULONG: c_int = 7;
pub(crate) const GMT_FLOAT: c_int = 8;
pub(crate) const GMT_DOUBLE: c_int = 9;
pub(crate) const GMT_TEXT: c_int = 16;

pub(crate) const GMT_CONTAINER_ONLY: c_int = 1;

/// Every name the mock knows.
pub(crate) const ENUMS: &[(&str, c_int)] = &[
    ("GMT_IS_DATASET", GMT_IS_DATASET),
    ("GMT_IS_GRID", GMT_IS_GRID),
    ("GMT_IS_IMAGE", GMT_IS_IMAGE),
    ("GMT_IS_MATRIX", GMT_IS_MATRIX),
    ("GMT_IS_VECTOR", GMT_IS_VECTOR),
    ("GMT_VIA_VECTOR", GMT_VIA_VECTOR),
    ("GMT_VIA_MATRIX", GMT_VIA_MATRIX),
    ("GMT_IN", 0),
    ("GMT_OUT", GMT_OUT),
    ("GMT_IS_DUPLICATE", 3),
    ("GMT_IS_REFERENCE", 4),
    ("GMT_IS_POINT", 1),
    ("GMT_IS_PLP", 7),
    ("GMT_IS_SURFACE", 8),
    ("GMT_CHAR", GMT_CHAR),
    ("GMT_UCHAR", GMT_UCHAR),
    ("GMT_SHORT", GMT_SHORT),
    ("GMT_USHORT", GMT_USHORT),
    ("GMT_INT", GMT_INT),
    ("GMT_UINT", GMT_UINT),
    ("GMT_LONG", GMT_LONG),
    ("GMT_ULONG", GMT_ULONG),
    ("GMT_FLOAT", GMT_FLOAT),
    ("GMT_DOUBLE", GMT_DOUBLE),
    ("GMT_TEXT", GMT_TEXT),
    ("GMT_CONTAINER_AND_DATA", 0),
    ("GMT_CONTAINER_ONLY", GMT_CONTAINER_ONLY),
    ("GMT_MODULE_CMD", 0),
    ("GMT_SESSION_NOEXIT", 1),
    ("GMT_SESSION_EXTERNAL", 2),
    ("GMT_GRID_NODE_REG", 0),
    ("GMT_GRID_PIXEL_REG", 1),
];

pub(crate) fn lookup(name: &str) -> Option<c_int> {
    ENUMS.iter().find(|(n, _)| *n == name).map(|&(_, v)| v)
}

/// Splits a family code into its base family and `GMT_VIA_*` modifier.
pub(crate) fn split_family(family: c_int) -> (c_int, c_int) {
    (family % 100, family - family % 100)
}
