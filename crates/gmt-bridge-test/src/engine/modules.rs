//! Module emulation.
//!
//! | module       | reads                  | writes                                  |
//! |--------------|------------------------|-----------------------------------------|
//! | `gmtconvert` | vector or matrix table | dataset (double columns + text)         |
//! | `grdconvert` | grid                   | grid, re-padded                         |
//! | `grdmix`     | image                  | pixel-interleaved image, alpha separate |
//! | `basemap`    | `-Rw/e/s/n`            | nothing; remembers the region           |
//! | `gmtset`     | `KEY=value` tokens     | nothing; updates defaults               |
//!
//! Anything else fails with [`crate::status::MODULE_NOT_FOUND`].

use std::ffi::{c_char, c_int, CStr};
use std::slice;

use chrono::NaiveDateTime;
use gmt_types::Region;

use super::constants::*;
use super::objects::{node_index, DatasetData, GridData, ImageData, MatrixData, Object, Shape, VectorData};
use super::MockSession;
use crate::status;

/// Records per segment in emulated table outputs.
pub(crate) const SEGMENT_ROWS: usize = 4;
/// Pad of emulated grid outputs.
pub(crate) const OUTPUT_GRID_PAD: u32 = 2;

const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

type ModuleResult = Result<Option<Object>, String>;

pub(crate) fn run(session: &mut MockSession, module: &str, args: &str) -> c_int {
    let tokens = split_args(args);
    let input = tokens.iter().find(|t| t.starts_with("@GMTAPI@")).map(String::as_str);
    let output = tokens.iter().find_map(|t| t.strip_prefix("->"));

    let result = match module {
        "gmtconvert" => with_input(session, input, convert_table),
        "grdconvert" => with_input(session, input, convert_grid),
        "grdmix" => with_input(session, input, mix_image),
        "basemap" => set_region(session, &tokens),
        "gmtset" => {
            for (key, value) in tokens.iter().filter_map(|t| t.split_once('=')) {
                session.set_default(key, value);
            }
            Ok(None)
        }
        _ => {
            session.error(format!("Shared GMT module not found: {}", module));
            return status::MODULE_NOT_FOUND;
        }
    };

    match result {
        Ok(Some(object)) => match output {
            Some(name) => write_output(session, module, name, object),
            None => 0,
        },
        Ok(None) => 0,
        Err(message) => {
            session.error(format!("{} [ERROR]: {}", module, message));
            status::RUNTIME_ERROR
        }
    }
}

fn split_args(args: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in args.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn with_input(session: &MockSession, input: Option<&str>, convert: fn(&Object) -> ModuleResult) -> ModuleResult {
    let name = input.ok_or("no input virtual file given")?;
    let file = session
        .vfiles
        .get(name)
        .ok_or_else(|| format!("virtual file {} is not open", name))?;
    if file.output {
        return Err(format!("{} is an output", name));
    }
    let object = session
        .objects
        .get(&file.object)
        .ok_or_else(|| format!("virtual file {} has no data", name))?;
    convert(object)
}

fn write_output(session: &mut MockSession, module: &str, name: &str, object: Object) -> c_int {
    let family = match &object {
        Object::Grid(_) => GMT_IS_GRID,
        Object::Image(_) => GMT_IS_IMAGE,
        _ => GMT_IS_DATASET,
    };
    let key = object.key();
    let previous = match session.vfiles.get_mut(name) {
        Some(file) if file.output => {
            let previous = file.written.filter(|_| !file.read);
            file.written = Some((key, family));
            file.read = false;
            previous
        }
        _ => {
            session.error(format!("{} [ERROR]: {} is not an output virtual file", module, name));
            return status::RUNTIME_ERROR;
        }
    };
    if let Some((old, _)) = previous {
        session.objects.remove(&old);
    }
    session.objects.insert(key, object);
    0
}

fn set_region(session: &mut MockSession, tokens: &[String]) -> ModuleResult {
    let spec = tokens
        .iter()
        .find_map(|t| t.strip_prefix("-R"))
        .ok_or("no region given")?;
    let bounds: Vec<f64> = spec
        .split('/')
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|_| format!("bad region {}", spec))?;
    let wesn: [f64; 4] = bounds.try_into().map_err(|_| format!("bad region {}", spec))?;
    session.region = Some(Region::from_wesn(wesn));
    Ok(None)
}

fn convert_table(object: &Object) -> ModuleResult {
    let (columns, text) = match object {
        Object::Vector(vector) => vector_columns(vector)?,
        Object::Matrix(matrix) => (matrix_columns(matrix)?, None),
        other => return Err(format!("expected a table, got a {}", other.kind())),
    };
    Ok(Some(Object::Dataset(DatasetData::new(columns, text, SEGMENT_ROWS))))
}

fn vector_columns(vector: &VectorData) -> Result<(Vec<Vec<f64>>, Option<Vec<String>>), String> {
    let n_rows = vector.n_rows();
    let columns = vector
        .types
        .iter()
        .zip(&vector.columns)
        .enumerate()
        .map(|(index, (&type_, column))| {
            let ptr = column.as_raw();
            if ptr.is_null() && n_rows > 0 {
                return Err(format!("column {} was never set", index));
            }
            // Safety: the bridge keeps each column alive while registered.
            unsafe { read_column(type_ as c_int, ptr, n_rows) }
        })
        .collect::<Result<Vec<_>, _>>()?;
    let text = (!vector.vector.text.is_null()).then(|| {
        // Safety: set_text stored one pointer per row.
        unsafe { read_strings(vector.vector.text as *const *const c_char, n_rows) }
    });
    Ok((columns, text))
}

fn matrix_columns(matrix: &MatrixData) -> Result<Vec<Vec<f64>>, String> {
    let m = &matrix.matrix;
    let (n_rows, n_columns, stride) = (m.n_rows as usize, m.n_columns as usize, m.dim);
    let ptr = m.data.as_raw();
    if ptr.is_null() && n_rows > 0 {
        return Err("matrix data was never set".to_string());
    }
    // Safety: the bridge keeps the matrix alive while registered.
    let values = unsafe { read_column(m.type_ as c_int, ptr, n_rows * stride)? };
    Ok((0..n_columns)
        .map(|c| (0..n_rows).map(|r| values[r * stride + c]).collect())
        .collect())
}

macro_rules! widen {
    ($ptr:expr, $len:expr, $ty:ty) => {
        slice::from_raw_parts($ptr as *const $ty, $len)
            .iter()
            .map(|&v| v as f64)
            .collect()
    };
}

/// Reads `len` values of GMT type `type_` as doubles.
unsafe fn read_column(type_: c_int, ptr: *const std::ffi::c_void, len: usize) -> Result<Vec<f64>, String> {
    if len == 0 {
        return Ok(Vec::new());
    }
    Ok(match type_ {
        GMT_CHAR => widen!(ptr, len, i8),
        GMT_UCHAR => widen!(ptr, len, u8),
        GMT_SHORT => widen!(ptr, len, i16),
        GMT_USHORT => widen!(ptr, len, u16),
        GMT_INT => widen!(ptr, len, i32),
        GMT_UINT => widen!(ptr, len, u32),
        GMT_LONG => widen!(ptr, len, i64),
        GMT_ULONG => widen!(ptr, len, u64),
        GMT_FLOAT => widen!(ptr, len, f32),
        GMT_DOUBLE => slice::from_raw_parts(ptr as *const f64, len).to_vec(),
        GMT_TEXT => read_strings(ptr as *const *const c_char, len)
            .iter()
            .map(|s| parse_value(s))
            .collect(),
        other => return Err(format!("unsupported column type {}", other)),
    })
}

unsafe fn read_strings(ptr: *const *const c_char, len: usize) -> Vec<String> {
    slice::from_raw_parts(ptr, len)
        .iter()
        .map(|&s| {
            if s.is_null() {
                String::new()
            } else {
                CStr::from_ptr(s).to_string_lossy().into_owned()
            }
        })
        .collect()
}

/// Text columns hold ISO 8601 times or numbers; times become seconds since
/// the Unix epoch.
fn parse_value(text: &str) -> f64 {
    if let Ok(time) = NaiveDateTime::parse_from_str(text, DATETIME_FORMAT) {
        return time.and_utc().timestamp_micros() as f64 / 1e6;
    }
    text.parse().unwrap_or(f64::NAN)
}

fn convert_grid(object: &Object) -> ModuleResult {
    let Object::Grid(input) = object else {
        return Err(format!("expected a grid, got a {}", object.kind()));
    };
    let header = &input.header;
    let shape = Shape {
        n_columns: header.n_columns,
        n_rows: header.n_rows,
        n_bands: 1,
        wesn: header.wesn,
        inc: header.inc,
        registration: header.registration,
        pad: OUTPUT_GRID_PAD,
    };
    let mut output = GridData::new(&shape);
    let values = input.interior();
    let columns = header.n_columns as usize;
    for row in 0..header.n_rows as usize {
        for column in 0..columns {
            let index = node_index(&output.header, row, column);
            output.data[index] = values[row * columns + column];
        }
    }
    output.header.nan_value = header.nan_value;
    output.header.z_min = header.z_min;
    output.header.z_max = header.z_max;
    output.header.title = header.title;
    Ok(Some(Object::Grid(output)))
}

fn mix_image(object: &Object) -> ModuleResult {
    let Object::Image(input) = object else {
        return Err(format!("expected an image, got a {}", object.kind()));
    };
    let header = &input.header;
    let layout = header.mem_layout_str();
    if !layout.starts_with("TRB") {
        return Err(format!("cannot read image layout {}", layout));
    }
    let bands = header.n_bands as usize;
    let with_alpha = bands == 4;
    let out_bands = if with_alpha { 3 } else { bands };
    let shape = Shape {
        n_columns: header.n_columns,
        n_rows: header.n_rows,
        n_bands: out_bands as u32,
        wesn: header.wesn,
        inc: header.inc,
        registration: header.registration,
        pad: 0,
    };
    let mut output = ImageData::new(&shape, if with_alpha { "TRPa" } else { "TRP" }, with_alpha);

    let plane = header.size;
    let columns = header.n_columns as usize;
    for row in 0..header.n_rows as usize {
        for column in 0..columns {
            let source = node_index(header, row, column);
            let pixel = row * columns + column;
            for band in 0..out_bands {
                output.data[pixel * out_bands + band] = input.data[band * plane + source];
            }
            if let Some(alpha) = output.alpha.as_mut() {
                alpha[pixel] = input.data[3 * plane + source];
            }
        }
    }
    Ok(Some(Object::Image(output)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_args_keeps_quoted_tokens() {
        assert_eq!(
            split_args("@GMTAPI@-000000 \"-B+tA title\"  ->@GMTAPI@-000001"),
            vec!["@GMTAPI@-000000", "-B+tA title", "->@GMTAPI@-000001"]
        );
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("2023-11-14T22:13:20"), 1_700_000_000.0);
        assert_eq!(parse_value("2023-11-14T22:13:20.5"), 1_700_000_000.5);
        assert_eq!(parse_value("3.25"), 3.25);
        assert!(parse_value("NaN").is_nan());
        assert!(parse_value("abc").is_nan());
    }

    #[test]
    fn test_read_integer_column() {
        let values = [1i16, -2, 3];
        let out = unsafe { read_column(GMT_SHORT, values.as_ptr().cast(), 3) }.unwrap();
        assert_eq!(out, vec![1.0, -2.0, 3.0]);
    }
}
