//! Function-pointer table for the GMT 6 C API.
//!
//! The bridge never links against libgmt at build time. Instead the entry
//! points it needs are resolved once from a loaded shared library (or
//! supplied directly by an in-process engine) and stored in
//! [`GmtFunctions`].

use std::ffi::{c_char, c_double, c_float, c_int, c_uint, c_void};

use libloading::Library;

use crate::error::{LoadError, LoadResult};

/// `int (*print_func)(FILE *, const char *)` passed to `GMT_Create_Session`.
pub type PrintFunc = unsafe extern "C" fn(*mut c_void, *const c_char) -> c_int;

pub type CreateSessionFn =
    unsafe extern "C" fn(*const c_char, c_uint, c_uint, Option<PrintFunc>) -> *mut c_void;
pub type DestroySessionFn = unsafe extern "C" fn(*mut c_void) -> c_int;
pub type GetEnumFn = unsafe extern "C" fn(*mut c_void, *const c_char) -> c_int;
pub type GetVersionFn =
    unsafe extern "C" fn(*mut c_void, *mut c_uint, *mut c_uint, *mut c_uint) -> c_float;
pub type GetDefaultFn = unsafe extern "C" fn(*mut c_void, *const c_char, *mut c_char) -> c_int;
pub type SetDefaultFn = unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char) -> c_int;
pub type CallModuleFn = unsafe extern "C" fn(*mut c_void, *const c_char, c_int, *mut c_void) -> c_int;
pub type CreateDataFn = unsafe extern "C" fn(
    *mut c_void,
    c_uint,
    c_uint,
    c_uint,
    *const u64,
    *const c_double,
    *const c_double,
    c_uint,
    c_int,
    *mut c_void,
) -> *mut c_void;
pub type PutVectorFn = unsafe extern "C" fn(*mut c_void, *mut c_void, c_uint, c_uint, *mut c_void) -> c_int;
pub type PutMatrixFn = unsafe extern "C" fn(*mut c_void, *mut c_void, c_uint, c_int, *mut c_void) -> c_int;
pub type PutStringsFn = unsafe extern "C" fn(*mut c_void, c_uint, *mut c_void, *mut *mut c_char) -> c_int;
pub type OpenVirtualFileFn =
    unsafe extern "C" fn(*mut c_void, c_uint, c_uint, c_uint, *mut c_void, *mut c_char) -> c_int;
pub type CloseVirtualFileFn = unsafe extern "C" fn(*mut c_void, *const c_char) -> c_int;
pub type ReadVirtualFileFn = unsafe extern "C" fn(*mut c_void, *const c_char) -> *mut c_void;
pub type InquireVirtualFileFn = unsafe extern "C" fn(*mut c_void, *const c_char) -> c_int;
pub type DestroyDataFn = unsafe extern "C" fn(*mut c_void, *mut c_void) -> c_int;
pub type ExtractRegionFn = unsafe extern "C" fn(*mut c_void, *mut c_char, *mut c_double) -> c_int;

/// Resolved GMT entry points.
///
/// Copies of these pointers are only valid while the library they were
/// resolved from stays loaded; [`crate::NativeLibrary`] owns both.
#[derive(Clone, Copy)]
pub struct GmtFunctions {
    pub create_session: CreateSessionFn,
    pub destroy_session: DestroySessionFn,
    pub get_enum: GetEnumFn,
    pub get_version: GetVersionFn,
    pub get_default: GetDefaultFn,
    pub set_default: SetDefaultFn,
    pub call_module: CallModuleFn,
    pub create_data: CreateDataFn,
    pub put_vector: PutVectorFn,
    pub put_matrix: PutMatrixFn,
    pub put_strings: PutStringsFn,
    pub open_virtualfile: OpenVirtualFileFn,
    pub close_virtualfile: CloseVirtualFileFn,
    pub read_virtualfile: ReadVirtualFileFn,
    pub inquire_virtualfile: InquireVirtualFileFn,
    pub destroy_data: DestroyDataFn,
    pub extract_region: ExtractRegionFn,
}

impl std::fmt::Debug for GmtFunctions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GmtFunctions")
            .field("create_session", &(self.create_session as *const c_void))
            .finish_non_exhaustive()
    }
}

/// Symbol names resolved by [`GmtFunctions::resolve`], in table order.
pub const REQUIRED_SYMBOLS: &[&str] = &[
    "GMT_Create_Session",
    "GMT_Destroy_Session",
    "GMT_Get_Enum",
    "GMT_Get_Version",
    "GMT_Get_Default",
    "GMT_Set_Default",
    "GMT_Call_Module",
    "GMT_Create_Data",
    "GMT_Put_Vector",
    "GMT_Put_Matrix",
    "GMT_Put_Strings",
    "GMT_Open_VirtualFile",
    "GMT_Close_VirtualFile",
    "GMT_Read_VirtualFile",
    "GMT_Inquire_VirtualFile",
    "GMT_Destroy_Data",
    "GMT_Extract_Region",
];

impl GmtFunctions {
    /// Resolves every entry point from a loaded library.
    ///
    /// # Safety
    ///
    /// `library` must be a GMT 6 shared library whose exported symbols have
    /// the signatures declared in this module.
    pub unsafe fn resolve(library: &Library) -> LoadResult<Self> {
        macro_rules! symbol {
            ($name:literal, $ty:ty) => {{
                let sym = library
                    .get::<$ty>(concat!($name, "\0").as_bytes())
                    .map_err(|source| LoadError::MissingSymbol {
                        symbol: $name,
                        source,
                    })?;
                *sym
            }};
        }

        Ok(Self {
            create_session: symbol!("GMT_Create_Session", CreateSessionFn),
            destroy_session: symbol!("GMT_Destroy_Session", DestroySessionFn),
            get_enum: symbol!("GMT_Get_Enum", GetEnumFn),
            get_version: symbol!("GMT_Get_Version", GetVersionFn),
            get_default: symbol!("GMT_Get_Default", GetDefaultFn),
            set_default: symbol!("GMT_Set_Default", SetDefaultFn),
            call_module: symbol!("GMT_Call_Module", CallModuleFn),
            create_data: symbol!("GMT_Create_Data", CreateDataFn),
            put_vector: symbol!("GMT_Put_Vector", PutVectorFn),
            put_matrix: symbol!("GMT_Put_Matrix", PutMatrixFn),
            put_strings: symbol!("GMT_Put_Strings", PutStringsFn),
            open_virtualfile: symbol!("GMT_Open_VirtualFile", OpenVirtualFileFn),
            close_virtualfile: symbol!("GMT_Close_VirtualFile", CloseVirtualFileFn),
            read_virtualfile: symbol!("GMT_Read_VirtualFile", ReadVirtualFileFn),
            inquire_virtualfile: symbol!("GMT_Inquire_VirtualFile", InquireVirtualFileFn),
            destroy_data: symbol!("GMT_Destroy_Data", DestroyDataFn),
            extract_region: symbol!("GMT_Extract_Region", ExtractRegionFn),
        })
    }
}
