//! Images: 8-bit bands in one engine-allocated array.
//!
//! Inputs are written band-interleaved (`TRB`). Outputs arrive in whatever
//! layout the module chose; the third letter of the header's `mem_layout`
//! says how bands are interleaved:
//!
//! * `B`: one full plane per band
//! * `L`: bands interleaved row by row
//! * `P`: bands interleaved pixel by pixel
//!
//! Some modules return the alpha channel in a separate array; it is
//! appended as the fourth band.

use gmt_sys::types::{GmtGridHeader, GmtImage, XHI, XLO, YHI, YLO};
use gmt_types::{Image, Increments, Region, Registration};
use tracing::{debug, warn};

use super::{native_slice, PreparedInput};
use crate::error::{BridgeError, BridgeResult, RegistrationFailure};
use crate::session::Session;

const FAMILY: &str = "GMT_IS_IMAGE";
const GEOMETRY: &str = "GMT_IS_SURFACE";
const INPUT_LAYOUT: &str = "TRB";

/// Band interleaving of a native image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interleave {
    Band,
    Line,
    Pixel,
}

impl Interleave {
    fn from_layout(layout: &str) -> Option<Self> {
        match layout.chars().nth(2) {
            Some('B') | None => Some(Interleave::Band),
            Some('L') => Some(Interleave::Line),
            Some('P') => Some(Interleave::Pixel),
            Some(_) => None,
        }
    }
}

/// Geometry of the padded native array.
struct Layout {
    interleave: Interleave,
    n_bands: usize,
    mx: usize,
    plane: usize,
    pad_left: usize,
    pad_top: usize,
}

impl Layout {
    fn new(header: &GmtGridHeader, interleave: Interleave, n_bands: usize) -> Self {
        let pad_left = header.pad[XLO] as usize;
        let pad_top = header.pad[YHI] as usize;
        let mx = if header.mx > 0 {
            header.mx as usize
        } else {
            header.n_columns as usize + pad_left + header.pad[XHI] as usize
        };
        let my = if header.my > 0 {
            header.my as usize
        } else {
            header.n_rows as usize + pad_top + header.pad[YLO] as usize
        };
        let plane = if header.size > 0 { header.size } else { mx * my };
        Self {
            interleave,
            n_bands,
            mx,
            plane,
            pad_left,
            pad_top,
        }
    }

    /// Offset of one node within a single plane.
    fn node(&self, row: usize, column: usize) -> usize {
        (row + self.pad_top) * self.mx + column + self.pad_left
    }

    fn index(&self, band: usize, row: usize, column: usize) -> usize {
        match self.interleave {
            Interleave::Band => band * self.plane + self.node(row, column),
            Interleave::Line => ((row + self.pad_top) * self.n_bands + band) * self.mx + column + self.pad_left,
            Interleave::Pixel => self.node(row, column) * self.n_bands + band,
        }
    }

    fn len(&self) -> usize {
        self.plane * self.n_bands
    }

    /// Samples needed to reach the last interior node of the last band.
    fn required_len(&self, n_rows: usize, n_columns: usize) -> usize {
        if n_rows == 0 || n_columns == 0 || self.n_bands == 0 {
            return 0;
        }
        self.index(self.n_bands - 1, n_rows - 1, n_columns - 1) + 1
    }

    /// Nodes needed in a single plane, such as a separate alpha channel.
    fn required_plane(&self, n_rows: usize, n_columns: usize) -> usize {
        if n_rows == 0 || n_columns == 0 {
            return 0;
        }
        self.node(n_rows - 1, n_columns - 1) + 1
    }
}

pub(crate) fn to_native_image<'s>(session: &'s Session, image: &Image) -> BridgeResult<PreparedInput<'s>> {
    image.validate()?;
    let object = session.create_data(
        "input image",
        FAMILY,
        GEOMETRY,
        "GMT_CONTAINER_AND_DATA",
        Some([image.n_columns as u64, image.n_rows as u64, image.n_bands as u64, 0]),
        Some(image.region.wesn()),
        Some(image.increments.as_array()),
        image.registration.code(),
        0,
    )?;

    // Safety: an image container created with data has a header and an
    // array of `n_bands * header.size` samples.
    unsafe {
        let native = (object.as_ptr() as *mut GmtImage)
            .as_mut()
            .ok_or_else(|| shape_disagreement("null image container"))?;
        let header = native
            .header
            .as_mut()
            .ok_or_else(|| shape_disagreement("image container has no header"))?;
        if (header.n_rows as usize, header.n_columns as usize) != (image.n_rows, image.n_columns) {
            return Err(shape_disagreement(format!(
                "engine sized the image {}x{}, host data is {}x{}",
                header.n_rows, header.n_columns, image.n_rows, image.n_columns
            )));
        }
        header.set_mem_layout(INPUT_LAYOUT);
        if !image.is_empty() {
            let layout = Layout::new(header, Interleave::Band, image.n_bands);
            if native.data.is_null() {
                return Err(shape_disagreement("image container has no data array"));
            }
            let samples = std::slice::from_raw_parts_mut(native.data, layout.len());
            let plane = image.n_rows * image.n_columns;
            for band in 0..image.n_bands {
                for row in 0..image.n_rows {
                    for column in 0..image.n_columns {
                        samples[layout.index(band, row, column)] =
                            image.data[band * plane + row * image.n_columns + column];
                    }
                }
            }
        }
    }

    debug!(
        rows = image.n_rows,
        columns = image.n_columns,
        bands = image.n_bands,
        "Marshaled image"
    );
    Ok(PreparedInput {
        family: FAMILY,
        geometry: GEOMETRY,
        object,
        buffers: Vec::new(),
        warnings: Vec::new(),
    })
}

fn shape_disagreement(detail: impl Into<String>) -> BridgeError {
    BridgeError::registration(
        "input image",
        RegistrationFailure::ShapeDisagreement { detail: detail.into() },
        String::new(),
    )
}

/// Copies a native image into a band-major host image.
///
/// # Safety
///
/// `image` must point to a `GMT_IMAGE` that stays valid for the call.
pub(crate) unsafe fn from_native_image(image: *const GmtImage, handle: &str) -> BridgeResult<Image> {
    let native = image
        .as_ref()
        .ok_or_else(|| BridgeError::malformed(handle, "null image"))?;
    let header = native
        .header
        .as_ref()
        .ok_or_else(|| BridgeError::malformed(handle, "image has no header"))?;
    let registration = Registration::from_code(header.registration)
        .ok_or_else(|| BridgeError::malformed(handle, format!("unknown registration {}", header.registration)))?;
    let mem_layout = header.mem_layout_str();
    let interleave = Interleave::from_layout(&mem_layout)
        .ok_or_else(|| BridgeError::malformed(handle, format!("unknown memory layout '{}'", mem_layout)))?;
    let (n_rows, n_columns) = (header.n_rows as usize, header.n_columns as usize);
    let n_bands = header.n_bands as usize;
    let layout = Layout::new(header, interleave, n_bands);

    let samples = native_slice(native.data as *const u8, layout.len())
        .ok_or_else(|| BridgeError::malformed(handle, "image has no data"))?;
    let alpha = match (native.alpha.is_null(), n_bands) {
        (false, 3) => native_slice(native.alpha as *const u8, layout.plane),
        (false, bands) => {
            warn!(handle, bands, "Ignoring separate alpha channel");
            None
        }
        (true, _) => None,
    };
    if samples.len() < layout.required_len(n_rows, n_columns) {
        return Err(BridgeError::malformed(
            handle,
            format!("{} samples cannot hold a {}x{}x{} image", samples.len(), n_bands, n_rows, n_columns),
        ));
    }
    if alpha.is_some_and(|alpha| alpha.len() < layout.required_plane(n_rows, n_columns)) {
        return Err(BridgeError::malformed(handle, "alpha plane is shorter than the image"));
    }

    let plane = n_rows * n_columns;
    let total_bands = n_bands + usize::from(alpha.is_some());
    let mut data = Vec::with_capacity(plane * total_bands);
    for band in 0..n_bands {
        for row in 0..n_rows {
            for column in 0..n_columns {
                data.push(samples[layout.index(band, row, column)]);
            }
        }
    }
    if let Some(alpha) = alpha {
        for row in 0..n_rows {
            for column in 0..n_columns {
                data.push(alpha[layout.node(row, column)]);
            }
        }
    }

    let out = Image {
        data,
        n_bands: total_bands,
        n_rows,
        n_columns,
        region: Region::from_wesn(header.wesn),
        increments: Increments::new(header.inc[0], header.inc[1]),
        registration,
    };
    out.validate().map_err(|e| BridgeError::malformed(handle, e.to_string()))?;
    debug!(handle, layout = %mem_layout, bands = total_bands, "Read back image");
    Ok(out)
}
