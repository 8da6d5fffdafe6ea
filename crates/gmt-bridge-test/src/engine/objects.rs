//! Native containers allocated by the mock engine.
//!
//! Each container keeps the Rust allocations its C struct points into, so
//! the struct stays valid for as long as the owning [`Object`] lives.
//! Moving an `Object` moves only boxes and vectors, never their contents.

use std::ffi::{c_char, c_uint, CString};
use std::ptr;

use gmt_sys::types::{
    GmtDataSegment, GmtDataTable, GmtDataset, GmtGrid, GmtGridHeader, GmtImage, GmtMatrix, GmtUnivector,
    GmtVector, GMT_GRID_COMMAND_LEN320, GMT_GRID_REMARK_LEN160, XLO, YHI,
};

use super::constants::GMT_DOUBLE;

pub(crate) enum Object {
    Vector(VectorData),
    Matrix(MatrixData),
    Grid(GridData),
    Image(ImageData),
    Dataset(DatasetData),
}

impl Object {
    /// Address handed to the bridge.
    pub(crate) fn key(&self) -> usize {
        match self {
            Object::Vector(v) => &*v.vector as *const GmtVector as usize,
            Object::Matrix(m) => &*m.matrix as *const GmtMatrix as usize,
            Object::Grid(g) => &*g.grid as *const GmtGrid as usize,
            Object::Image(i) => &*i.image as *const GmtImage as usize,
            Object::Dataset(d) => &*d.dataset as *const GmtDataset as usize,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Object::Vector(_) => "vector",
            Object::Matrix(_) => "matrix",
            Object::Grid(_) => "grid",
            Object::Image(_) => "image",
            Object::Dataset(_) => "dataset",
        }
    }
}

/// Column vectors filled by `GMT_Put_Vector` and `GMT_Put_Strings`.
pub(crate) struct VectorData {
    pub vector: Box<GmtVector>,
    pub types: Vec<c_uint>,
    pub columns: Vec<GmtUnivector>,
    pub text: Vec<CString>,
    pub text_ptrs: Vec<*mut c_char>,
}

impl VectorData {
    pub(crate) fn new(n_columns: usize, n_rows: usize) -> Self {
        let mut types = vec![GMT_DOUBLE as c_uint; n_columns];
        let mut columns = vec![GmtUnivector::NULL; n_columns];
        let vector = Box::new(GmtVector {
            n_columns: n_columns as u64,
            n_rows: n_rows as u64,
            registration: 0,
            type_: types.as_mut_ptr(),
            range: [0.0; 2],
            data: columns.as_mut_ptr(),
            text: ptr::null_mut(),
            command: [0; GMT_GRID_COMMAND_LEN320],
            remark: [0; GMT_GRID_REMARK_LEN160],
            header: ptr::null_mut(),
            n_headers: 0,
            hidden: ptr::null_mut(),
        });
        Self {
            vector,
            types,
            columns,
            text: Vec::new(),
            text_ptrs: Vec::new(),
        }
    }

    pub(crate) fn n_rows(&self) -> usize {
        self.vector.n_rows as usize
    }

    pub(crate) fn set_text(&mut self, lines: Vec<CString>) {
        self.text = lines;
        self.text_ptrs = self.text.iter().map(|s| s.as_ptr() as *mut c_char).collect();
        self.vector.text = self.text_ptrs.as_mut_ptr();
    }
}

/// A single typed array filled by `GMT_Put_Matrix`.
pub(crate) struct MatrixData {
    pub matrix: Box<GmtMatrix>,
}

impl MatrixData {
    pub(crate) fn new(n_columns: usize, n_rows: usize) -> Self {
        Self {
            matrix: Box::new(GmtMatrix {
                n_rows: n_rows as u64,
                n_columns: n_columns as u64,
                n_layers: 1,
                shape: 0,
                registration: 0,
                dim: n_columns,
                size: n_rows * n_columns,
                type_: GMT_DOUBLE as c_uint,
                range: [0.0; 6],
                inc: [0.0; 3],
                data: GmtUnivector::NULL,
                text: ptr::null_mut(),
                command: [0; GMT_GRID_COMMAND_LEN320],
                remark: [0; GMT_GRID_REMARK_LEN160],
                header: ptr::null_mut(),
                n_headers: 0,
                hidden: ptr::null_mut(),
            }),
        }
    }
}

/// Header fields shared by grids and images.
pub(crate) struct Shape {
    pub n_columns: u32,
    pub n_rows: u32,
    pub n_bands: u32,
    pub wesn: [f64; 4],
    pub inc: [f64; 2],
    pub registration: u32,
    pub pad: u32,
}

impl Shape {
    /// Node counts implied by region, spacing and registration.
    pub(crate) fn from_region(wesn: [f64; 4], inc: [f64; 2], registration: u32, pad: u32) -> Self {
        let nodes = |extent: f64, step: f64| {
            let n = (extent / step).round();
            let n = if registration == 0 { n + 1.0 } else { n };
            n.max(0.0) as u32
        };
        Self {
            n_columns: nodes(wesn[1] - wesn[0], inc[0]),
            n_rows: nodes(wesn[3] - wesn[2], inc[1]),
            n_bands: 1,
            wesn,
            inc,
            registration,
            pad,
        }
    }

    pub(crate) fn header(&self, layout: &str) -> GmtGridHeader {
        let mx = self.n_columns + 2 * self.pad;
        let my = self.n_rows + 2 * self.pad;
        let mut header = GmtGridHeader {
            n_columns: self.n_columns,
            n_rows: self.n_rows,
            registration: self.registration,
            wesn: self.wesn,
            inc: self.inc,
            mx,
            my,
            nm: (self.n_columns * self.n_rows) as usize,
            size: (mx * my) as usize,
            n_bands: self.n_bands,
            pad: [self.pad; 4],
            xy_off: if self.registration == 0 { 0.0 } else { 0.5 },
            ..Default::default()
        };
        header.set_mem_layout(layout);
        header
    }
}

/// Offset of an interior node in a padded plane.
pub(crate) fn node_index(header: &GmtGridHeader, row: usize, column: usize) -> usize {
    (row + header.pad[YHI] as usize) * header.mx as usize + column + header.pad[XLO] as usize
}

pub(crate) struct GridData {
    pub grid: Box<GmtGrid>,
    pub header: Box<GmtGridHeader>,
    pub data: Vec<f32>,
}

impl GridData {
    pub(crate) fn new(shape: &Shape) -> Self {
        let mut header = Box::new(shape.header("TR"));
        let mut data = vec![0.0f32; header.size];
        let grid = Box::new(GmtGrid {
            header: &mut *header,
            data: data.as_mut_ptr(),
            x: ptr::null_mut(),
            y: ptr::null_mut(),
            hidden: ptr::null_mut(),
        });
        Self { grid, header, data }
    }

    /// Interior samples, north row first.
    pub(crate) fn interior(&self) -> Vec<f32> {
        let (rows, columns) = (self.header.n_rows as usize, self.header.n_columns as usize);
        let mut out = Vec::with_capacity(rows * columns);
        for row in 0..rows {
            for column in 0..columns {
                out.push(self.data[node_index(&self.header, row, column)]);
            }
        }
        out
    }
}

pub(crate) struct ImageData {
    pub image: Box<GmtImage>,
    pub header: Box<GmtGridHeader>,
    pub data: Vec<u8>,
    pub alpha: Option<Vec<u8>>,
}

impl ImageData {
    pub(crate) fn new(shape: &Shape, layout: &str, with_alpha: bool) -> Self {
        let mut header = Box::new(shape.header(layout));
        let mut data = vec![0u8; header.size * shape.n_bands as usize];
        let mut alpha = with_alpha.then(|| vec![0u8; header.size]);
        let image = Box::new(GmtImage {
            type_: 1,
            colormap: ptr::null_mut(),
            n_indexed_colors: 0,
            header: &mut *header,
            data: data.as_mut_ptr(),
            alpha: alpha.as_mut().map_or(ptr::null_mut(), |a| a.as_mut_ptr()),
            color_interp: ptr::null(),
            x: ptr::null_mut(),
            y: ptr::null_mut(),
            hidden: ptr::null_mut(),
        });
        Self {
            image,
            header,
            data,
            alpha,
        }
    }
}

struct SegmentData {
    segment: Box<GmtDataSegment>,
    _columns: Vec<Vec<f64>>,
    _column_ptrs: Vec<*mut f64>,
    _text: Vec<CString>,
    _text_ptrs: Vec<*mut c_char>,
}

pub(crate) struct DatasetData {
    pub dataset: Box<GmtDataset>,
    _table: Box<GmtDataTable>,
    _table_ptrs: Vec<*mut GmtDataTable>,
    _segments: Vec<SegmentData>,
    _segment_ptrs: Vec<*mut GmtDataSegment>,
}

impl DatasetData {
    /// Builds a one-table dataset, splitting records into segments of at
    /// most `segment_rows`.
    pub(crate) fn new(columns: Vec<Vec<f64>>, text: Option<Vec<String>>, segment_rows: usize) -> Self {
        let n_columns = columns.len();
        let n_rows = columns.first().map_or(text.as_ref().map_or(0, Vec::len), Vec::len);
        let segment_rows = segment_rows.max(1);

        let mut segments: Vec<SegmentData> = (0..n_rows)
            .step_by(segment_rows)
            .map(|start| {
                let end = (start + segment_rows).min(n_rows);
                let mut seg_columns: Vec<Vec<f64>> = columns.iter().map(|c| c[start..end].to_vec()).collect();
                let mut column_ptrs: Vec<*mut f64> = seg_columns.iter_mut().map(|c| c.as_mut_ptr()).collect();
                let seg_text: Vec<CString> = text
                    .as_ref()
                    .map(|t| {
                        t[start..end]
                            .iter()
                            .map(|s| CString::new(s.replace('\0', "")).unwrap_or_default())
                            .collect()
                    })
                    .unwrap_or_default();
                let mut text_ptrs: Vec<*mut c_char> = seg_text.iter().map(|s| s.as_ptr() as *mut c_char).collect();
                let segment = Box::new(GmtDataSegment {
                    n_rows: (end - start) as u64,
                    n_columns: n_columns as u64,
                    min: ptr::null_mut(),
                    max: ptr::null_mut(),
                    data: column_ptrs.as_mut_ptr(),
                    label: ptr::null_mut(),
                    header: ptr::null_mut(),
                    text: if text.is_some() {
                        text_ptrs.as_mut_ptr()
                    } else {
                        ptr::null_mut()
                    },
                    hidden: ptr::null_mut(),
                });
                SegmentData {
                    segment,
                    _columns: seg_columns,
                    _column_ptrs: column_ptrs,
                    _text: seg_text,
                    _text_ptrs: text_ptrs,
                }
            })
            .collect();

        let mut segment_ptrs: Vec<*mut GmtDataSegment> =
            segments.iter_mut().map(|s| &mut *s.segment as *mut GmtDataSegment).collect();
        let mut table = Box::new(GmtDataTable {
            n_headers: 0,
            n_columns: n_columns as u64,
            n_segments: segments.len() as u64,
            n_records: n_rows as u64,
            min: ptr::null_mut(),
            max: ptr::null_mut(),
            header: ptr::null_mut(),
            segment: segment_ptrs.as_mut_ptr(),
            hidden: ptr::null_mut(),
        });
        let mut table_ptrs = vec![&mut *table as *mut GmtDataTable];
        let dataset = Box::new(GmtDataset {
            n_tables: 1,
            n_columns: n_columns as u64,
            n_segments: segments.len() as u64,
            n_records: n_rows as u64,
            min: ptr::null_mut(),
            max: ptr::null_mut(),
            table: table_ptrs.as_mut_ptr(),
            type_: 0,
            geometry: 0,
            ProjRefPROJ4: ptr::null_mut(),
            ProjRefWKT: ptr::null_mut(),
            ProjRefEPSG: 0,
            hidden: ptr::null_mut(),
        });
        Self {
            dataset,
            _table: table,
            _table_ptrs: table_ptrs,
            _segments: segments,
            _segment_ptrs: segment_ptrs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dataset_segments() {
        let data = DatasetData::new(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]], None, 2);
        assert_eq!(data.dataset.n_records, 3);
        assert_eq!(data.dataset.n_segments, 2);
        let table = unsafe { &**data.dataset.table };
        let second = unsafe { &**table.segment.add(1) };
        assert_eq!(second.n_rows, 1);
        assert_eq!(unsafe { *(*second.data.add(1)) }, 6.0);
        assert!(second.text.is_null());
    }

    #[test]
    fn test_shape_from_region() {
        let shape = Shape::from_region([0.0, 4.0, 0.0, 2.0], [1.0, 1.0], 0, 2);
        assert_eq!((shape.n_columns, shape.n_rows), (5, 3));
        let header = shape.header("TR");
        assert_eq!((header.mx, header.my, header.size), (9, 7, 63));
        assert_eq!(node_index(&header, 0, 0), 20);
    }

    #[test]
    fn test_object_keys_are_struct_addresses() {
        let grid = GridData::new(&Shape::from_region([0.0, 1.0, 0.0, 1.0], [1.0, 1.0], 0, 0));
        let expected = &*grid.grid as *const GmtGrid as usize;
        assert_eq!(Object::Grid(grid).key(), expected);
    }
}
