//! Tables: host columns to `GMT_IS_DATASET|GMT_VIA_VECTOR` and back from
//! `GMT_DATASET`.
//!
//! Numeric and datetime columns become vector columns in table order;
//! datetimes travel as ISO 8601 text the engine parses into its time axis.
//! Text columns are joined with single spaces into the trailing text.
//!
//! The engine returns datasets as double-precision columns plus optional
//! trailing text. Without a [`TableSchema`] every numeric column reads back
//! as `Float64` (named `col0`, `col1`, ...) and the trailing text as one
//! `Text` column named `text`. A schema restores names and types.

use std::ffi::{CStr, CString};

use chrono::{DateTime, NaiveDateTime};
use gmt_sys::types::{GmtDataSegment, GmtDataTable, GmtDataset};
use gmt_types::{Column, ColumnData, DType, Table, TableSchema};
use tracing::debug;

use super::{check_integer_range, native_slice, native_type_name, numeric_ptr, PreparedInput};
use crate::error::{BridgeError, BridgeResult};
use crate::session::Session;
use crate::virtualfile::HostBuffer;

const FAMILY: &str = "GMT_IS_DATASET|GMT_VIA_VECTOR";
const GEOMETRY: &str = "GMT_IS_POINT";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
/// Stands in for a missing text or datetime cell; read back as missing.
const MISSING: &str = "NaN";

/// Where the values of one vector column come from.
enum ColumnSource {
    /// Host memory used in place.
    Borrowed(&'static str, *mut std::ffi::c_void),
    /// A converted copy kept alive by the registry.
    Owned(&'static str, HostBuffer),
}

/// Builds a native dataset for `table`.
pub(crate) fn to_native_table<'s>(session: &'s Session, table: &Table) -> BridgeResult<PreparedInput<'s>> {
    let n_rows = table.validate()?;
    if table.columns.is_empty() {
        return Err(BridgeError::shape_mismatch("table has no columns"));
    }

    let limit = session.marshal_config().max_exact_integer;
    for column in &table.columns {
        check_integer_range(&column.name, &column.data, |i| column.is_valid(i), limit)?;
    }

    let (text, numeric): (Vec<&Column>, Vec<&Column>) = table.columns.iter().partition(|c| c.dtype() == DType::Text);
    let sources = numeric
        .iter()
        .map(|column| column_source(column))
        .collect::<BridgeResult<Vec<_>>>()?;
    let trailing = if text.is_empty() {
        None
    } else {
        Some(trailing_text(&text, n_rows)?)
    };

    let object = session.create_data(
        "input table",
        FAMILY,
        GEOMETRY,
        "GMT_CONTAINER_ONLY",
        Some([numeric.len() as u64, n_rows as u64, 1, 0]),
        None,
        None,
        0,
        0,
    )?;

    let mut buffers = Vec::new();
    for (index, (column, source)) in numeric.iter().zip(sources).enumerate() {
        let (type_name, ptr) = match source {
            ColumnSource::Borrowed(type_name, ptr) => (type_name, ptr),
            ColumnSource::Owned(type_name, mut buffer) => {
                let ptr = buffer.as_native_ptr();
                buffers.push(buffer);
                (type_name, ptr)
            }
        };
        session.put_vector(&object, &column.name, index, type_name, ptr)?;
    }

    if let Some(lines) = trailing {
        let mut buffer = HostBuffer::strings(lines);
        let ptr = buffer.as_native_ptr();
        buffers.push(buffer);
        session.put_strings(&object, "GMT_IS_VECTOR|GMT_IS_DUPLICATE", ptr)?;
    }

    debug!(
        rows = n_rows,
        numeric = numeric.len(),
        text = text.len(),
        copied = buffers.len(),
        "Marshaled table"
    );

    Ok(PreparedInput {
        family: FAMILY,
        geometry: GEOMETRY,
        object,
        buffers,
        warnings: Vec::new(),
    })
}

fn column_source(column: &Column) -> BridgeResult<ColumnSource> {
    let has_nulls = column.null_count() > 0;
    match &column.data {
        ColumnData::DateTime(values) => {
            let strings = values
                .iter()
                .enumerate()
                .map(|(i, value)| {
                    if column.is_valid(i) {
                        value.format(DATETIME_FORMAT).to_string()
                    } else {
                        MISSING.to_string()
                    }
                })
                .map(|s| CString::new(s).map_err(|e| BridgeError::invalid_argument(e.to_string())))
                .collect::<BridgeResult<Vec<_>>>()?;
            Ok(ColumnSource::Owned("GMT_TEXT", HostBuffer::strings(strings)))
        }
        ColumnData::Text(_) => Err(BridgeError::unsupported_dtype(
            &column.name,
            DType::Text,
            "text columns travel as trailing text",
        )),
        ColumnData::Float32(values) if has_nulls => {
            let masked = values
                .iter()
                .enumerate()
                .map(|(i, &v)| if column.is_valid(i) { v } else { f32::NAN })
                .collect();
            Ok(ColumnSource::Owned("GMT_FLOAT", HostBuffer::F32(masked)))
        }
        data if has_nulls => {
            // Integers have no NaN; missing values need a float column.
            let masked = (0..data.len())
                .map(|i| {
                    if column.is_valid(i) {
                        data.value_f64(i).unwrap_or(f64::NAN)
                    } else {
                        f64::NAN
                    }
                })
                .collect();
            Ok(ColumnSource::Owned("GMT_DOUBLE", HostBuffer::F64(masked)))
        }
        data => {
            let ptr = numeric_ptr(data).ok_or_else(|| {
                BridgeError::unsupported_dtype(&column.name, data.dtype(), "not a numeric column")
            })?;
            Ok(ColumnSource::Borrowed(native_type_name(data.dtype()), ptr))
        }
    }
}

fn trailing_text(columns: &[&Column], n_rows: usize) -> BridgeResult<Vec<CString>> {
    (0..n_rows)
        .map(|row| {
            let parts: Vec<&str> = columns
                .iter()
                .map(|column| match &column.data {
                    ColumnData::Text(values) if column.is_valid(row) => values[row].as_str(),
                    _ => MISSING,
                })
                .collect();
            CString::new(parts.join(" ")).map_err(|_| {
                BridgeError::unsupported_dtype(
                    &columns[0].name,
                    DType::Text,
                    format!("row {} contains a NUL byte", row),
                )
            })
        })
        .collect()
}

/// Values gathered from every segment of a dataset.
struct Gathered {
    numeric: Vec<Vec<f64>>,
    text: Vec<Option<String>>,
    has_text: bool,
}

/// Copies a native dataset into a host table.
///
/// # Safety
///
/// `dataset` must point to a `GMT_DATASET` that stays valid for the call.
pub(crate) unsafe fn from_native_table(
    dataset: *const GmtDataset,
    schema: Option<&TableSchema>,
    handle: &str,
) -> BridgeResult<Table> {
    let gathered = gather(dataset, handle)?;
    match schema {
        Some(schema) => restore_with_schema(gathered, schema, handle),
        None => Ok(widen(gathered)),
    }
}

unsafe fn gather(dataset: *const GmtDataset, handle: &str) -> BridgeResult<Gathered> {
    let dataset = dataset
        .as_ref()
        .ok_or_else(|| BridgeError::malformed(handle, "null dataset"))?;
    let n_columns = dataset.n_columns as usize;
    let mut out = Gathered {
        numeric: vec![Vec::with_capacity(dataset.n_records as usize); n_columns],
        text: Vec::new(),
        has_text: false,
    };

    let tables = native_slice(dataset.table as *const *mut GmtDataTable, dataset.n_tables as usize)
        .ok_or_else(|| BridgeError::malformed(handle, "dataset has no table array"))?;
    for &table in tables {
        let table = table
            .as_ref()
            .ok_or_else(|| BridgeError::malformed(handle, "null table"))?;
        let segments = native_slice(table.segment as *const *mut GmtDataSegment, table.n_segments as usize)
            .ok_or_else(|| BridgeError::malformed(handle, "table has no segment array"))?;
        for &segment in segments {
            let segment = segment
                .as_ref()
                .ok_or_else(|| BridgeError::malformed(handle, "null segment"))?;
            gather_segment(segment, n_columns, &mut out, handle)?;
        }
    }
    Ok(out)
}

unsafe fn gather_segment(
    segment: &GmtDataSegment,
    n_columns: usize,
    out: &mut Gathered,
    handle: &str,
) -> BridgeResult<()> {
    let n_rows = segment.n_rows as usize;
    if (segment.n_columns as usize) < n_columns {
        return Err(BridgeError::malformed(
            handle,
            format!("segment has {} columns, dataset {}", segment.n_columns, n_columns),
        ));
    }
    let columns = native_slice(segment.data as *const *mut f64, n_columns)
        .ok_or_else(|| BridgeError::malformed(handle, "segment has no column array"))?;
    for (values, &column) in out.numeric.iter_mut().zip(columns) {
        let column = native_slice(column as *const f64, n_rows)
            .ok_or_else(|| BridgeError::malformed(handle, "null column data"))?;
        values.extend_from_slice(column);
    }

    if segment.text.is_null() {
        out.text.extend(std::iter::repeat(None).take(n_rows));
        return Ok(());
    }
    out.has_text = true;
    let lines = native_slice(segment.text as *const *mut std::ffi::c_char, n_rows).unwrap_or(&[]);
    out.text.extend(lines.iter().map(|&line| {
        if line.is_null() {
            None
        } else {
            Some(CStr::from_ptr(line).to_string_lossy().into_owned())
        }
    }));
    Ok(())
}

fn widen(gathered: Gathered) -> Table {
    let mut columns: Vec<Column> = gathered
        .numeric
        .into_iter()
        .enumerate()
        .map(|(i, values)| Column::new(format!("col{}", i), values))
        .collect();
    if gathered.has_text {
        columns.push(text_column("text", gathered.text));
    }
    Table::new(columns)
}

fn text_column(name: &str, values: Vec<Option<String>>) -> Column {
    let any_missing = values.iter().any(Option::is_none);
    let validity: Vec<bool> = values.iter().map(Option::is_some).collect();
    let column = Column::new(name, values.into_iter().map(Option::unwrap_or_default).collect::<Vec<String>>());
    if any_missing {
        column.with_validity(validity)
    } else {
        column
    }
}

fn restore_with_schema(gathered: Gathered, schema: &TableSchema, handle: &str) -> BridgeResult<Table> {
    let n_numeric = schema.numeric_columns().count();
    if n_numeric != gathered.numeric.len() {
        return Err(BridgeError::malformed(
            handle,
            format!(
                "schema expects {} numeric columns, engine returned {}",
                n_numeric,
                gathered.numeric.len()
            ),
        ));
    }
    let n_text = schema.text_columns().count();
    let n_rows = gathered.text.len().max(gathered.numeric.first().map_or(0, Vec::len));
    if n_text > 0 && !gathered.has_text && n_rows > 0 {
        return Err(BridgeError::malformed(handle, "schema expects text but the engine returned none"));
    }

    let mut text_parts: Vec<Vec<Option<String>>> = vec![Vec::with_capacity(n_rows); n_text];
    for line in &gathered.text {
        match line {
            Some(line) if n_text > 0 => {
                let mut parts = line.splitn(n_text, ' ');
                for values in text_parts.iter_mut() {
                    let part = parts.next().unwrap_or_default();
                    values.push((part != MISSING).then(|| part.to_string()));
                }
            }
            _ => text_parts.iter_mut().for_each(|values| values.push(None)),
        }
    }

    let mut numeric = gathered.numeric.into_iter();
    let mut text = text_parts.into_iter();
    let mut columns = Vec::with_capacity(schema.len());
    for spec in &schema.columns {
        let column = if spec.dtype == DType::Text {
            text_column(&spec.name, text.next().unwrap_or_default())
        } else {
            let values = numeric.next().unwrap_or_default();
            restore_column(&spec.name, spec.dtype, values)?
        };
        columns.push(column);
    }
    Ok(Table::new(columns))
}

macro_rules! restore_integers {
    ($name:expr, $dtype:expr, $values:expr, $ty:ty) => {{
        let mut validity = Vec::with_capacity($values.len());
        let mut out: Vec<$ty> = Vec::with_capacity($values.len());
        for (row, &value) in $values.iter().enumerate() {
            if value.is_nan() {
                validity.push(false);
                out.push(0);
                continue;
            }
            // MAX + 1 is a power of two, so the upper bound is exact even
            // where MAX itself rounds up in f64.
            if value.fract() != 0.0 || value < <$ty>::MIN as f64 || value >= <$ty>::MAX as f64 + 1.0 {
                return Err(BridgeError::unsupported_dtype(
                    $name,
                    $dtype,
                    format!("value {} in row {} does not fit", value, row),
                ));
            }
            validity.push(true);
            out.push(value as $ty);
        }
        (ColumnData::from(out), validity)
    }};
}

/// Converts one double-precision column back to `dtype`.
///
/// NaN becomes a masked-out row holding the type's default value.
fn restore_column(name: &str, dtype: DType, values: Vec<f64>) -> BridgeResult<Column> {
    let (data, validity) = match dtype {
        DType::Float64 => return Ok(Column::new(name, values)),
        DType::Float32 => {
            if let Some((row, value)) = values
                .iter()
                .enumerate()
                .find(|(_, v)| v.is_finite() && v.abs() > f64::from(f32::MAX))
            {
                return Err(BridgeError::unsupported_dtype(
                    name,
                    dtype,
                    format!("value {} in row {} does not fit", value, row),
                ));
            }
            return Ok(Column::new(name, values.iter().map(|&v| v as f32).collect::<Vec<f32>>()));
        }
        DType::Int8 => restore_integers!(name, dtype, values, i8),
        DType::Int16 => restore_integers!(name, dtype, values, i16),
        DType::Int32 => restore_integers!(name, dtype, values, i32),
        DType::Int64 => restore_integers!(name, dtype, values, i64),
        DType::UInt8 => restore_integers!(name, dtype, values, u8),
        DType::UInt16 => restore_integers!(name, dtype, values, u16),
        DType::UInt32 => restore_integers!(name, dtype, values, u32),
        DType::UInt64 => restore_integers!(name, dtype, values, u64),
        DType::DateTime => restore_datetimes(name, &values)?,
        DType::Text => {
            return Err(BridgeError::unsupported_dtype(
                name,
                dtype,
                "text is restored from trailing text",
            ))
        }
    };
    let column = Column::new(name, data);
    if validity.iter().all(|&v| v) {
        Ok(column)
    } else {
        Ok(column.with_validity(validity))
    }
}

/// Engine time values are seconds since the Unix epoch; restored to the
/// nearest microsecond.
fn restore_datetimes(name: &str, values: &[f64]) -> BridgeResult<(ColumnData, Vec<bool>)> {
    let mut validity = Vec::with_capacity(values.len());
    let mut out: Vec<NaiveDateTime> = Vec::with_capacity(values.len());
    for (row, &seconds) in values.iter().enumerate() {
        if seconds.is_nan() {
            validity.push(false);
            out.push(NaiveDateTime::default());
            continue;
        }
        let micros = (seconds * 1e6).round();
        let stamp = (micros.abs() < i64::MAX as f64)
            .then(|| DateTime::from_timestamp_micros(micros as i64))
            .flatten()
            .ok_or_else(|| {
                BridgeError::unsupported_dtype(
                    name,
                    DType::DateTime,
                    format!("value {} in row {} is out of range", seconds, row),
                )
            })?;
        validity.push(true);
        out.push(stamp.naive_utc());
    }
    Ok((ColumnData::DateTime(out), validity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn gathered(numeric: Vec<Vec<f64>>, text: Vec<Option<String>>) -> Gathered {
        let has_text = text.iter().any(Option::is_some);
        let text = if text.is_empty() {
            vec![None; numeric.first().map_or(0, Vec::len)]
        } else {
            text
        };
        Gathered {
            numeric,
            text,
            has_text,
        }
    }

    #[test]
    fn test_widen_without_schema() {
        let table = widen(gathered(
            vec![vec![1.0, 2.0], vec![3.0, 4.0]],
            vec![Some("a".to_string()), None],
        ));
        assert_eq!(table.names(), vec!["col0", "col1", "text"]);
        assert_eq!(table.columns[0].data, ColumnData::Float64(vec![1.0, 2.0]));
        assert_eq!(table.columns[2].validity, Some(vec![true, false]));
    }

    #[test]
    fn test_restore_types_with_schema() {
        let schema = TableSchema::new([
            ("n", DType::Int32),
            ("label", DType::Text),
            ("f", DType::Float32),
        ]);
        let table = restore_with_schema(
            gathered(
                vec![vec![1.0, f64::NAN], vec![0.5, 1.5]],
                vec![Some("x".to_string()), Some("y".to_string())],
            ),
            &schema,
            "@out",
        )
        .unwrap();
        assert_eq!(table.names(), vec!["n", "label", "f"]);
        assert_eq!(table.columns[0].data, ColumnData::Int32(vec![1, 0]));
        assert_eq!(table.columns[0].validity, Some(vec![true, false]));
        assert_eq!(table.columns[1].data, ColumnData::Text(vec!["x".to_string(), "y".to_string()]));
        assert_eq!(table.columns[2].data, ColumnData::Float32(vec![0.5, 1.5]));
    }

    #[test]
    fn test_restore_splits_multiple_text_columns() {
        let schema = TableSchema::new([("x", DType::Float64), ("a", DType::Text), ("b", DType::Text)]);
        let table = restore_with_schema(
            gathered(vec![vec![1.0]], vec![Some("first second part".to_string())]),
            &schema,
            "@out",
        )
        .unwrap();
        assert_eq!(table.columns[1].data, ColumnData::from(vec!["first"]));
        assert_eq!(table.columns[2].data, ColumnData::from(vec!["second part"]));
    }

    #[test]
    fn test_restore_masks_missing_text_cells() {
        let schema = TableSchema::new([("x", DType::Float64), ("a", DType::Text), ("b", DType::Text)]);
        let table = restore_with_schema(
            gathered(
                vec![vec![1.0, 2.0]],
                vec![Some("NaN tail".to_string()), Some("head NaN".to_string())],
            ),
            &schema,
            "@out",
        )
        .unwrap();
        assert_eq!(table.columns[1].validity, Some(vec![false, true]));
        assert_eq!(table.columns[2].validity, Some(vec![true, false]));
        assert_eq!(table.columns[1].data, ColumnData::from(vec!["", "head"]));
        assert_eq!(table.columns[2].data, ColumnData::from(vec!["tail", ""]));
    }

    #[test]
    fn test_restore_rejects_fractional_integer() {
        let err = restore_column("n", DType::Int16, vec![1.0, 2.5]).unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedDType { dtype: DType::Int16, .. }));
    }

    #[test]
    fn test_restore_rejects_out_of_range_integer() {
        assert!(restore_column("n", DType::UInt8, vec![256.0]).is_err());
        assert!(restore_column("n", DType::UInt8, vec![-1.0]).is_err());
        assert!(restore_column("n", DType::Int8, vec![-128.0]).is_ok());
        assert!(restore_column("n", DType::UInt8, vec![255.0]).is_ok());
    }

    #[test]
    fn test_restore_rejects_64_bit_values_past_the_top() {
        let two_63 = 2f64.powi(63);
        let two_64 = 2f64.powi(64);
        assert!(restore_column("n", DType::UInt64, vec![two_64]).is_err());
        assert!(restore_column("n", DType::Int64, vec![two_63]).is_err());
        assert!(restore_column("n", DType::Int64, vec![-two_63 * 2.0]).is_err());

        let column = restore_column("n", DType::Int64, vec![-two_63]).unwrap();
        assert_eq!(column.data, ColumnData::Int64(vec![i64::MIN]));
        // Largest doubles below the limits still convert exactly.
        let column = restore_column("n", DType::UInt64, vec![two_64 - 2048.0]).unwrap();
        assert_eq!(column.data, ColumnData::UInt64(vec![u64::MAX - 2047]));
        let column = restore_column("n", DType::Int64, vec![two_63 - 1024.0]).unwrap();
        assert_eq!(column.data, ColumnData::Int64(vec![i64::MAX - 1023]));
    }

    #[test]
    fn test_restore_datetimes() {
        let column = restore_column("t", DType::DateTime, vec![1_700_000_000.0, f64::NAN]).unwrap();
        let expected = NaiveDate::from_ymd_opt(2023, 11, 14)
            .unwrap()
            .and_hms_opt(22, 13, 20)
            .unwrap();
        match &column.data {
            ColumnData::DateTime(values) => assert_eq!(values[0], expected),
            other => panic!("unexpected data {other:?}"),
        }
        assert_eq!(column.validity, Some(vec![true, false]));
    }

    #[test]
    fn test_schema_column_count_mismatch() {
        let schema = TableSchema::new([("x", DType::Float64)]);
        let err = restore_with_schema(gathered(vec![vec![1.0], vec![2.0]], vec![]), &schema, "@out").unwrap_err();
        assert!(matches!(err, BridgeError::ReadBack { .. }));
    }

    #[test]
    fn test_datetime_strings() {
        let when = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_milli_opt(12, 30, 0, 250)
            .unwrap();
        let column = Column::new("t", vec![when, when]).with_validity(vec![true, false]);
        match column_source(&column).unwrap() {
            ColumnSource::Owned(type_name, HostBuffer::Strings { _owned, .. }) => {
                assert_eq!(type_name, "GMT_TEXT");
                assert_eq!(_owned[0].to_str().unwrap(), "2024-02-29T12:30:00.250");
                assert_eq!(_owned[1].to_str().unwrap(), "NaN");
            }
            _ => panic!("expected owned strings"),
        }
    }

    #[test]
    fn test_integer_nulls_become_doubles() {
        let column = Column::new("n", vec![1i32, 2]).with_validity(vec![false, true]);
        match column_source(&column).unwrap() {
            ColumnSource::Owned(type_name, HostBuffer::F64(values)) => {
                assert_eq!(type_name, "GMT_DOUBLE");
                assert!(values[0].is_nan());
                assert_eq!(values[1], 2.0);
            }
            _ => panic!("expected owned doubles"),
        }
    }

    #[test]
    fn test_trailing_text_joins_columns() {
        let a = Column::new("a", vec!["x", "y"]);
        let b = Column::new("b", vec!["1", "2"]).with_validity(vec![true, false]);
        let lines = trailing_text(&[&a, &b], 2).unwrap();
        assert_eq!(lines[0].to_str().unwrap(), "x 1");
        assert_eq!(lines[1].to_str().unwrap(), "y NaN");
    }
}
