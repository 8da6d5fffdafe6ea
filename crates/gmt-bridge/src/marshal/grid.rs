//! Grids: header plus padded single-precision samples.
//!
//! The engine allocates the padded array; samples are copied into its
//! interior and the pad is left for the engine to fill. A no-data sentinel
//! becomes NaN in the native array and is recorded as the header's
//! `nan_value`, which is how it survives the round trip.

use gmt_sys::types::{GmtGrid, GmtGridHeader, XHI, XLO, YHI, YLO};
use gmt_types::{Grid, Increments, Region, Registration};
use tracing::debug;

use super::{native_slice, PreparedInput};
use crate::error::{BridgeError, BridgeResult, RegistrationFailure};
use crate::session::Session;
use crate::virtualfile::MarshalWarning;

const FAMILY: &str = "GMT_IS_GRID";
const GEOMETRY: &str = "GMT_IS_SURFACE";

pub(crate) fn to_native_grid<'s>(session: &'s Session, grid: &Grid) -> BridgeResult<PreparedInput<'s>> {
    grid.validate()?;
    let warnings: Vec<MarshalWarning> = grid
        .irregular_axes(session.marshal_config().spacing_tolerance)
        .into_iter()
        .map(|axis| MarshalWarning::IrregularSpacing { axis })
        .collect();

    // The engine derives the shape from region and spacing; an empty grid
    // has none to derive.
    let dim = grid.is_empty().then_some([0, 0, 1, 0]);
    let object = session.create_data(
        "input grid",
        FAMILY,
        GEOMETRY,
        "GMT_CONTAINER_AND_DATA",
        dim,
        Some(grid.region.wesn()),
        Some(grid.increments.as_array()),
        grid.registration.code(),
        session.pad() as i32,
    )?;

    // Safety: a grid container created with data has a header and, when
    // non-empty, a padded array of `header.size` samples.
    unsafe {
        let native = (object.as_ptr() as *mut GmtGrid)
            .as_mut()
            .ok_or_else(|| shape_disagreement("null grid container"))?;
        let header = native
            .header
            .as_mut()
            .ok_or_else(|| shape_disagreement("grid container has no header"))?;
        if header.n_rows as usize != grid.n_rows || header.n_columns as usize != grid.n_columns {
            return Err(shape_disagreement(format!(
                "engine sized the grid {}x{}, host data is {}x{}",
                header.n_rows, header.n_columns, grid.n_rows, grid.n_columns
            )));
        }
        fill_header(header, grid);
        if !grid.is_empty() {
            let len = padded_len(header);
            if native.data.is_null() || len < required_len(header) {
                return Err(shape_disagreement("grid array is missing or smaller than its header"));
            }
            copy_into(grid, header, std::slice::from_raw_parts_mut(native.data, len));
        }
    }

    debug!(
        rows = grid.n_rows,
        columns = grid.n_columns,
        registration = %grid.registration,
        nodata = ?grid.nodata,
        "Marshaled grid"
    );
    Ok(PreparedInput {
        family: FAMILY,
        geometry: GEOMETRY,
        object,
        buffers: Vec::new(),
        warnings,
    })
}

fn shape_disagreement(detail: impl Into<String>) -> BridgeError {
    BridgeError::registration(
        "input grid",
        RegistrationFailure::ShapeDisagreement { detail: detail.into() },
        String::new(),
    )
}

fn fill_header(header: &mut GmtGridHeader, grid: &Grid) {
    if let Some((lo, hi)) = grid.z_range() {
        header.z_min = f64::from(lo);
        header.z_max = f64::from(hi);
    }
    if let Some(sentinel) = grid.nodata {
        header.nan_value = sentinel;
    }
    if !grid.title.is_empty() {
        header.set_title(&grid.title);
    }
}

/// Row stride of the padded array.
fn stride(header: &GmtGridHeader) -> usize {
    if header.mx > 0 {
        header.mx as usize
    } else {
        (header.n_columns + header.pad[XLO] + header.pad[XHI]) as usize
    }
}

fn padded_len(header: &GmtGridHeader) -> usize {
    if header.size > 0 {
        header.size
    } else {
        let rows = header.n_rows + header.pad[YLO] + header.pad[YHI];
        stride(header) * rows as usize
    }
}

/// Samples needed to reach the last interior node.
fn required_len(header: &GmtGridHeader) -> usize {
    if header.n_rows == 0 || header.n_columns == 0 {
        return 0;
    }
    node_index(header, header.n_rows as usize - 1, header.n_columns as usize - 1) + 1
}

fn node_index(header: &GmtGridHeader, row: usize, column: usize) -> usize {
    (row + header.pad[YHI] as usize) * stride(header) + column + header.pad[XLO] as usize
}

fn copy_into(grid: &Grid, header: &GmtGridHeader, samples: &mut [f32]) {
    for row in 0..grid.n_rows {
        for column in 0..grid.n_columns {
            let value = grid.data[row * grid.n_columns + column];
            samples[node_index(header, row, column)] = match grid.nodata {
                Some(sentinel) if value == sentinel => f32::NAN,
                _ => value,
            };
        }
    }
}

/// Copies a native grid into a host grid.
///
/// # Safety
///
/// `grid` must point to a `GMT_GRID` that stays valid for the call.
pub(crate) unsafe fn from_native_grid(grid: *const GmtGrid, handle: &str) -> BridgeResult<Grid> {
    let native = grid
        .as_ref()
        .ok_or_else(|| BridgeError::malformed(handle, "null grid"))?;
    let header = native
        .header
        .as_ref()
        .ok_or_else(|| BridgeError::malformed(handle, "grid has no header"))?;
    let registration = Registration::from_code(header.registration)
        .ok_or_else(|| BridgeError::malformed(handle, format!("unknown registration {}", header.registration)))?;
    let region = Region::from_wesn(header.wesn);
    let increments = Increments::new(header.inc[0], header.inc[1]);
    let (n_rows, n_columns) = (header.n_rows as usize, header.n_columns as usize);

    let nodata = header.nan_value.is_finite().then_some(header.nan_value);
    let title = header.title_str();

    if n_rows == 0 || n_columns == 0 {
        let mut empty = Grid::empty(region, increments, registration);
        empty.nodata = nodata;
        return Ok(empty.with_title(title));
    }

    let samples = native_slice(native.data as *const f32, padded_len(header))
        .ok_or_else(|| BridgeError::malformed(handle, "grid has no data"))?;
    if samples.len() < required_len(header) {
        return Err(BridgeError::malformed(handle, "grid array is smaller than its header"));
    }

    let mut data = Vec::with_capacity(n_rows * n_columns);
    for row in 0..n_rows {
        for column in 0..n_columns {
            let value = samples[node_index(header, row, column)];
            data.push(match nodata {
                Some(sentinel) if value.is_nan() => sentinel,
                _ => value,
            });
        }
    }

    let mut out = Grid::new(data, n_rows, n_columns, region, increments, registration)
        .map_err(|e| BridgeError::malformed(handle, e.to_string()))?;
    out.nodata = nodata;
    Ok(out.with_title(title))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn header(n_rows: u32, n_columns: u32, pad: u32) -> GmtGridHeader {
        let mut header = GmtGridHeader {
            n_rows,
            n_columns,
            pad: [pad; 4],
            wesn: [0.0, f64::from(n_columns - 1), 0.0, f64::from(n_rows - 1)],
            inc: [1.0, 1.0],
            ..Default::default()
        };
        header.mx = n_columns + 2 * pad;
        header.my = n_rows + 2 * pad;
        header.size = (header.mx * header.my) as usize;
        header
    }

    fn sample_grid() -> Grid {
        Grid::new(
            vec![1.0, 2.0, -9999.0, 4.0, 5.0, 6.0],
            2,
            3,
            Region::new(0.0, 2.0, 0.0, 1.0),
            Increments::uniform(1.0),
            Registration::Gridline,
        )
        .unwrap()
        .with_nodata(-9999.0)
        .with_title("depth")
    }

    #[test]
    fn test_node_index_skips_pad() {
        let header = header(2, 3, 2);
        assert_eq!(stride(&header), 7);
        assert_eq!(node_index(&header, 0, 0), 2 * 7 + 2);
        assert_eq!(node_index(&header, 1, 2), 3 * 7 + 4);
        assert_eq!(required_len(&header), 3 * 7 + 5);
    }

    #[test]
    fn test_copy_and_read_back_through_padded_array() {
        let grid = sample_grid();
        let mut header = header(2, 3, 2);
        fill_header(&mut header, &grid);
        assert_eq!(header.nan_value, -9999.0);
        assert_eq!((header.z_min, header.z_max), (1.0, 6.0));
        assert_eq!(header.title_str(), "depth");

        let mut samples = vec![0.0f32; header.size];
        copy_into(&grid, &header, &mut samples);
        assert!(samples[node_index(&header, 0, 2)].is_nan());
        assert_eq!(samples[node_index(&header, 1, 0)], 4.0);

        let mut native = GmtGrid {
            header: &mut header,
            data: samples.as_mut_ptr(),
            x: std::ptr::null_mut(),
            y: std::ptr::null_mut(),
            hidden: std::ptr::null_mut(),
        };
        let back = unsafe { from_native_grid(&mut native, "@grid") }.unwrap();
        assert_eq!(back, grid);
    }

    #[test]
    fn test_read_back_rejects_unknown_registration() {
        let mut header = header(2, 2, 0);
        header.registration = 7;
        let mut samples = vec![0.0f32; header.size];
        let mut native = GmtGrid {
            header: &mut header,
            data: samples.as_mut_ptr(),
            x: std::ptr::null_mut(),
            y: std::ptr::null_mut(),
            hidden: std::ptr::null_mut(),
        };
        let err = unsafe { from_native_grid(&mut native, "@grid") }.unwrap_err();
        assert!(matches!(err, BridgeError::ReadBack { .. }));
    }
}
