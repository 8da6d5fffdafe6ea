//! C-compatible layouts of the GMT 6 container structs.
//!
//! These mirror `gmt_resources.h` field for field. Only the bridge's
//! marshaling layer touches them; everything above it works with the
//! host containers in `gmt-types`.

#![allow(non_snake_case)]

use std::ffi::{c_char, c_int, c_uint, c_void};
use std::ptr;

/// Length of the units strings in a grid header.
pub const GMT_GRID_UNIT_LEN80: usize = 80;
/// Length of the title string in a grid header.
pub const GMT_GRID_TITLE_LEN80: usize = 80;
/// Length of the command string in a grid header.
pub const GMT_GRID_COMMAND_LEN320: usize = 320;
/// Length of the remark string in a grid header.
pub const GMT_GRID_REMARK_LEN160: usize = 160;
/// Default buffer size for virtual file names (`GMT_VF_LEN`).
pub const GMT_VF_LEN: usize = 32;
/// Buffer size used for `GMT_Get_Default` values.
pub const GMT_LEN256: usize = 256;
/// Value returned by `GMT_Get_Enum` for an unknown constant name.
pub const GMT_ENUM_UNKNOWN: c_int = -99999;

/// Pad indices into [`GmtGridHeader::pad`].
pub const XLO: usize = 0;
pub const XHI: usize = 1;
pub const YLO: usize = 2;
pub const YHI: usize = 3;

/// `gmt_grdfloat`: grids are stored in single precision.
pub type GmtGrdFloat = f32;

/// `union GMT_UNIVECTOR`: one typed column pointer.
///
/// All members are pointers, so the union has the size and alignment of
/// a single pointer. Which member is live is given by the owning
/// container's type enum.
#[repr(C)]
#[derive(Clone, Copy)]
pub union GmtUnivector {
    pub uc1: *mut u8,
    pub sc1: *mut i8,
    pub ui2: *mut u16,
    pub si2: *mut i16,
    pub ui4: *mut u32,
    pub si4: *mut i32,
    pub ui8: *mut u64,
    pub si8: *mut i64,
    pub f4: *mut f32,
    pub f8: *mut f64,
    pub raw: *mut c_void,
}

impl GmtUnivector {
    /// A null column pointer.
    pub const NULL: Self = Self {
        raw: ptr::null_mut(),
    };

    /// Returns the untyped pointer.
    pub fn as_raw(&self) -> *mut c_void {
        // Safety: every member is a pointer of identical size.
        unsafe { self.raw }
    }
}

impl Default for GmtUnivector {
    fn default() -> Self {
        Self::NULL
    }
}

impl std::fmt::Debug for GmtUnivector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GmtUnivector({:p})", self.as_raw())
    }
}

/// `struct GMT_GRID_HEADER`.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct GmtGridHeader {
    pub n_columns: u32,
    pub n_rows: u32,
    pub registration: u32,
    pub wesn: [f64; 4],
    pub z_min: f64,
    pub z_max: f64,
    pub inc: [f64; 2],
    pub z_scale_factor: f64,
    pub z_add_offset: f64,
    pub x_units: [c_char; GMT_GRID_UNIT_LEN80],
    pub y_units: [c_char; GMT_GRID_UNIT_LEN80],
    pub z_units: [c_char; GMT_GRID_UNIT_LEN80],
    pub title: [c_char; GMT_GRID_TITLE_LEN80],
    pub command: [c_char; GMT_GRID_COMMAND_LEN320],
    pub remark: [c_char; GMT_GRID_REMARK_LEN160],
    pub type_: u32,
    pub bits: u32,
    pub complex_mode: u32,
    pub mx: u32,
    pub my: u32,
    pub nm: usize,
    pub size: usize,
    pub n_bands: u32,
    pub pad: [u32; 4],
    pub mem_layout: [c_char; 4],
    pub nan_value: GmtGrdFloat,
    pub xy_off: f64,
    pub ProjRefPROJ4: *mut c_char,
    pub ProjRefWKT: *mut c_char,
    pub ProjRefEPSG: c_int,
    pub hidden: *mut c_void,
}

impl Default for GmtGridHeader {
    fn default() -> Self {
        Self {
            n_columns: 0,
            n_rows: 0,
            registration: 0,
            wesn: [0.0; 4],
            z_min: 0.0,
            z_max: 0.0,
            inc: [0.0; 2],
            z_scale_factor: 1.0,
            z_add_offset: 0.0,
            x_units: [0; GMT_GRID_UNIT_LEN80],
            y_units: [0; GMT_GRID_UNIT_LEN80],
            z_units: [0; GMT_GRID_UNIT_LEN80],
            title: [0; GMT_GRID_TITLE_LEN80],
            command: [0; GMT_GRID_COMMAND_LEN320],
            remark: [0; GMT_GRID_REMARK_LEN160],
            type_: 0,
            bits: 32,
            complex_mode: 0,
            mx: 0,
            my: 0,
            nm: 0,
            size: 0,
            n_bands: 1,
            pad: [0; 4],
            mem_layout: [0; 4],
            nan_value: f32::NAN,
            xy_off: 0.0,
            ProjRefPROJ4: ptr::null_mut(),
            ProjRefWKT: ptr::null_mut(),
            ProjRefEPSG: 0,
            hidden: ptr::null_mut(),
        }
    }
}

impl GmtGridHeader {
    /// Returns the memory layout code as a string (e.g. `"TRB"`).
    pub fn mem_layout_str(&self) -> String {
        fixed_to_string(&self.mem_layout)
    }

    /// Sets the memory layout code, truncating to four characters.
    ///
    /// The layout slot is not NUL-terminated when all four characters are
    /// used (e.g. `"TRPa"`).
    pub fn set_mem_layout(&mut self, layout: &str) {
        self.mem_layout = [0; 4];
        for (dst, &src) in self.mem_layout.iter_mut().zip(layout.as_bytes()) {
            *dst = src as c_char;
        }
    }

    /// Returns the grid title.
    pub fn title_str(&self) -> String {
        fixed_to_string(&self.title)
    }

    /// Sets the grid title.
    pub fn set_title(&mut self, title: &str) {
        string_to_fixed(title, &mut self.title);
    }
}

/// `struct GMT_GRID`.
#[repr(C)]
#[derive(Debug)]
pub struct GmtGrid {
    pub header: *mut GmtGridHeader,
    pub data: *mut GmtGrdFloat,
    pub x: *mut f64,
    pub y: *mut f64,
    pub hidden: *mut c_void,
}

/// `struct GMT_IMAGE`.
#[repr(C)]
#[derive(Debug)]
pub struct GmtImage {
    pub type_: c_uint,
    pub colormap: *mut c_int,
    pub n_indexed_colors: c_int,
    pub header: *mut GmtGridHeader,
    pub data: *mut u8,
    pub alpha: *mut u8,
    pub color_interp: *const c_char,
    pub x: *mut f64,
    pub y: *mut f64,
    pub hidden: *mut c_void,
}

/// `struct GMT_VECTOR`: column vectors of possibly different types.
#[repr(C)]
#[derive(Debug)]
pub struct GmtVector {
    pub n_columns: u64,
    pub n_rows: u64,
    pub registration: c_uint,
    pub type_: *mut c_uint,
    pub range: [f64; 2],
    pub data: *mut GmtUnivector,
    pub text: *mut *mut c_char,
    pub command: [c_char; GMT_GRID_COMMAND_LEN320],
    pub remark: [c_char; GMT_GRID_REMARK_LEN160],
    pub header: *mut *mut c_char,
    pub n_headers: c_uint,
    pub hidden: *mut c_void,
}

/// `struct GMT_MATRIX`: a single typed 2-D (or 3-D) array.
#[repr(C)]
#[derive(Debug)]
pub struct GmtMatrix {
    pub n_rows: u64,
    pub n_columns: u64,
    pub n_layers: u64,
    pub shape: c_uint,
    pub registration: c_uint,
    pub dim: usize,
    pub size: usize,
    pub type_: c_uint,
    pub range: [f64; 6],
    pub inc: [f64; 3],
    pub data: GmtUnivector,
    pub text: *mut *mut c_char,
    pub command: [c_char; GMT_GRID_COMMAND_LEN320],
    pub remark: [c_char; GMT_GRID_REMARK_LEN160],
    pub header: *mut *mut c_char,
    pub n_headers: c_uint,
    pub hidden: *mut c_void,
}

/// `struct GMT_DATASEGMENT`.
#[repr(C)]
#[derive(Debug)]
pub struct GmtDataSegment {
    pub n_rows: u64,
    pub n_columns: u64,
    pub min: *mut f64,
    pub max: *mut f64,
    pub data: *mut *mut f64,
    pub label: *mut c_char,
    pub header: *mut c_char,
    pub text: *mut *mut c_char,
    pub hidden: *mut c_void,
}

/// `struct GMT_DATATABLE`.
#[repr(C)]
#[derive(Debug)]
pub struct GmtDataTable {
    pub n_headers: c_uint,
    pub n_columns: u64,
    pub n_segments: u64,
    pub n_records: u64,
    pub min: *mut f64,
    pub max: *mut f64,
    pub header: *mut *mut c_char,
    pub segment: *mut *mut GmtDataSegment,
    pub hidden: *mut c_void,
}

/// `struct GMT_DATASET`.
#[repr(C)]
#[derive(Debug)]
pub struct GmtDataset {
    pub n_tables: u64,
    pub n_columns: u64,
    pub n_segments: u64,
    pub n_records: u64,
    pub min: *mut f64,
    pub max: *mut f64,
    pub table: *mut *mut GmtDataTable,
    pub type_: c_uint,
    pub geometry: c_uint,
    pub ProjRefPROJ4: *mut c_char,
    pub ProjRefWKT: *mut c_char,
    pub ProjRefEPSG: c_int,
    pub hidden: *mut c_void,
}

/// Reads a NUL-terminated fixed-size C char array into a `String`.
pub fn fixed_to_string(buf: &[c_char]) -> String {
    let bytes: Vec<u8> = buf
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Writes `value` into a fixed-size C char array, always NUL-terminating.
pub fn string_to_fixed(value: &str, buf: &mut [c_char]) {
    buf.iter_mut().for_each(|c| *c = 0);
    if buf.is_empty() {
        return;
    }
    let limit = buf.len() - 1;
    for (dst, &src) in buf.iter_mut().zip(value.as_bytes().iter().take(limit)) {
        *dst = src as c_char;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::mem::size_of;

    #[test]
    fn test_univector_is_pointer_sized() {
        assert_eq!(size_of::<GmtUnivector>(), size_of::<*mut c_void>());
        assert!(GmtUnivector::NULL.as_raw().is_null());
    }

    #[test]
    fn test_fixed_string_roundtrip() {
        let mut buf = [0 as c_char; 8];
        string_to_fixed("TRB", &mut buf);
        assert_eq!(fixed_to_string(&buf), "TRB");
    }

    #[test]
    fn test_fixed_string_truncates_and_terminates() {
        let mut buf = [0 as c_char; 4];
        string_to_fixed("TRBa-extra", &mut buf);
        assert_eq!(fixed_to_string(&buf), "TRB");
        assert_eq!(buf[3], 0);
    }

    #[test]
    fn test_header_layout_accessors() {
        let mut header = GmtGridHeader::default();
        header.set_mem_layout("TRPa");
        assert_eq!(header.mem_layout_str(), "TRPa");
        header.set_mem_layout("TR");
        assert_eq!(header.mem_layout_str(), "TR");
        header.set_title("bathymetry");
        assert_eq!(header.title_str(), "bathymetry");
        assert!(header.nan_value.is_nan());
    }
}
