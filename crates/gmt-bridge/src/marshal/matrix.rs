//! Matrices: one typed row-major buffer registered as
//! `GMT_IS_DATASET|GMT_VIA_MATRIX`, handed over without copying.

use gmt_types::Matrix;
use tracing::debug;

use super::{check_integer_range, native_type_name, numeric_ptr, PreparedInput};
use crate::error::{BridgeError, BridgeResult};
use crate::session::Session;

const FAMILY: &str = "GMT_IS_DATASET|GMT_VIA_MATRIX";
const GEOMETRY: &str = "GMT_IS_POINT";

pub(crate) fn to_native_matrix<'s>(session: &'s Session, matrix: &Matrix) -> BridgeResult<PreparedInput<'s>> {
    matrix.validate()?;
    let (n_rows, n_columns) = matrix.shape();
    check_integer_range(
        "matrix",
        &matrix.data,
        |_| true,
        session.marshal_config().max_exact_integer,
    )?;
    let values = numeric_ptr(&matrix.data)
        .ok_or_else(|| BridgeError::unsupported_dtype("matrix", matrix.dtype(), "matrix data must be numeric"))?;

    let object = session.create_data(
        "input matrix",
        FAMILY,
        GEOMETRY,
        "GMT_CONTAINER_ONLY",
        Some([n_columns as u64, n_rows as u64, 1, 0]),
        None,
        None,
        0,
        0,
    )?;
    session.put_matrix(&object, native_type_name(matrix.dtype()), 0, values)?;
    debug!(rows = n_rows, columns = n_columns, dtype = %matrix.dtype(), "Marshaled matrix");

    Ok(PreparedInput {
        family: FAMILY,
        geometry: GEOMETRY,
        object,
        buffers: Vec::new(),
        warnings: Vec::new(),
    })
}
