//! A loaded GMT library: entry points, version and threading capability.

use std::ffi::{c_char, c_int, c_uint, c_void, CStr, CString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;

use libloading::Library;
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::api::GmtFunctions;
use crate::error::{LoadError, LoadResult};
use crate::loader::{open_first, LibrarySearch};
use crate::types::{GMT_ENUM_UNKNOWN, GMT_LEN256};
use crate::version::Version;

/// Whether independent sessions may be open at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadModel {
    /// Sessions are independent instances; several may be open at once.
    MultiInstance,
    /// Sessions share hidden state; only one may be open process-wide.
    Serialized,
}

impl fmt::Display for ThreadModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadModel::MultiInstance => write!(f, "multi-instance"),
            ThreadModel::Serialized => write!(f, "serialized"),
        }
    }
}

/// Where the entry points came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibrarySource {
    /// A shared library opened from this path.
    Path(PathBuf),
    /// Entry points supplied by code linked into this process.
    InProcess(String),
}

impl fmt::Display for LibrarySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibrarySource::Path(path) => write!(f, "{}", path.display()),
            LibrarySource::InProcess(name) => write!(f, "in-process:{}", name),
        }
    }
}

/// A usable GMT library.
///
/// Holds the resolved entry points together with the `Library` they were
/// resolved from, so the function pointers can never outlive the mapping.
pub struct NativeLibrary {
    functions: GmtFunctions,
    source: LibrarySource,
    version: Version,
    thread_model: ThreadModel,
    session_mode: c_uint,
    _library: Option<Library>,
}

impl fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("source", &self.source)
            .field("version", &self.version)
            .field("thread_model", &self.thread_model)
            .finish()
    }
}

static GLOBAL: OnceCell<Arc<NativeLibrary>> = OnceCell::new();

impl NativeLibrary {
    /// Locates and loads libgmt.
    pub fn load(search: &LibrarySearch) -> LoadResult<Self> {
        let (library, path) = search.open()?;
        Self::from_library(library, path)
    }

    /// Loads libgmt from one specific file.
    pub fn load_path(path: &Path) -> LoadResult<Self> {
        let (library, path) = open_first(&[path.to_path_buf()])?;
        Self::from_library(library, path)
    }

    /// Returns the process-wide library, loading it on first use.
    ///
    /// Only a successful load is cached; `search` is ignored once a library
    /// is loaded. Failures are returned to every caller until a load
    /// succeeds.
    pub fn global(search: &LibrarySearch) -> LoadResult<Arc<Self>> {
        GLOBAL
            .get_or_try_init(|| Self::load(search).map(Arc::new))
            .cloned()
    }

    /// Wraps entry points provided by code in this process.
    ///
    /// # Safety
    ///
    /// Every pointer in `functions` must implement the corresponding GMT
    /// API contract and remain callable for the life of the process.
    pub unsafe fn from_functions(functions: GmtFunctions, name: impl Into<String>) -> LoadResult<Self> {
        Self::finish(functions, LibrarySource::InProcess(name.into()), None)
    }

    fn from_library(library: Library, path: PathBuf) -> LoadResult<Self> {
        // Safety: the library was found under a libgmt name; symbol
        // signatures are those of the GMT 6 API.
        let functions = unsafe { GmtFunctions::resolve(&library)? };
        // Safety: the pointers stay valid because `library` moves into the
        // returned value.
        unsafe { Self::finish(functions, LibrarySource::Path(path), Some(library)) }
    }

    unsafe fn finish(
        functions: GmtFunctions,
        source: LibrarySource,
        library: Option<Library>,
    ) -> LoadResult<Self> {
        let version = query_version(&functions)?;
        let session_mode = query_session_mode(&functions);
        let thread_model = probe_thread_model(&functions, session_mode);
        info!(%source, %version, %thread_model, "GMT library ready");
        Ok(Self {
            functions,
            source,
            version,
            thread_model,
            session_mode,
            _library: library,
        })
    }

    /// Resolved entry points.
    pub fn functions(&self) -> &GmtFunctions {
        &self.functions
    }

    /// Where the library was loaded from.
    pub fn source(&self) -> &LibrarySource {
        &self.source
    }

    /// Library version reported by `GMT_Get_Version`.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Threading capability determined when the library was loaded.
    pub fn thread_model(&self) -> ThreadModel {
        self.thread_model
    }

    /// `GMT_SESSION_EXTERNAL | GMT_SESSION_NOEXIT` for this library.
    pub fn session_mode(&self) -> c_uint {
        self.session_mode
    }
}

unsafe fn query_version(functions: &GmtFunctions) -> LoadResult<Version> {
    let (mut major, mut minor, mut patch): (c_uint, c_uint, c_uint) = (0, 0, 0);
    let reported = (functions.get_version)(ptr::null_mut(), &mut major, &mut minor, &mut patch);
    if major == 0 {
        return Err(LoadError::InvalidVersion {
            version: reported.to_string(),
        });
    }
    Ok(Version::new(major, minor, patch))
}

unsafe fn lookup_enum(functions: &GmtFunctions, name: &str) -> Option<c_int> {
    let key = CString::new(name).ok()?;
    let value = (functions.get_enum)(ptr::null_mut(), key.as_ptr());
    (value != GMT_ENUM_UNKNOWN).then_some(value)
}

unsafe fn query_session_mode(functions: &GmtFunctions) -> c_uint {
    ["GMT_SESSION_EXTERNAL", "GMT_SESSION_NOEXIT"]
        .iter()
        .filter_map(|name| lookup_enum(functions, name))
        .fold(0, |mode, value| mode | value as c_uint)
}

/// Key used to test whether sessions share configuration state.
const PROBE_KEY: &str = "PROJ_LENGTH_UNIT";

/// Opens two throw-away sessions and checks that they are independent.
///
/// Any failure along the way yields [`ThreadModel::Serialized`].
unsafe fn probe_thread_model(functions: &GmtFunctions, mode: c_uint) -> ThreadModel {
    let first = (functions.create_session)(c"gmt-probe-a".as_ptr(), 0, mode, None);
    let second = (functions.create_session)(c"gmt-probe-b".as_ptr(), 0, mode, None);

    let verdict = if first.is_null() || second.is_null() {
        debug!("Capability probe could not open two sessions");
        ThreadModel::Serialized
    } else if first == second {
        debug!("Capability probe received the same handle twice");
        ThreadModel::Serialized
    } else if sessions_independent(functions, first, second) {
        ThreadModel::MultiInstance
    } else {
        ThreadModel::Serialized
    };

    if !second.is_null() && second != first {
        (functions.destroy_session)(second);
    }
    if !first.is_null() {
        (functions.destroy_session)(first);
    }

    if verdict == ThreadModel::Serialized {
        warn!("GMT sessions share state; session use will be serialized");
    }
    verdict
}

unsafe fn read_default(functions: &GmtFunctions, api: *mut c_void, key: &CStr) -> Option<String> {
    let mut buf = [0 as c_char; GMT_LEN256];
    if (functions.get_default)(api, key.as_ptr(), buf.as_mut_ptr()) != 0 {
        return None;
    }
    Some(CStr::from_ptr(buf.as_ptr()).to_string_lossy().into_owned())
}

unsafe fn sessions_independent(functions: &GmtFunctions, first: *mut c_void, second: *mut c_void) -> bool {
    let key = match CString::new(PROBE_KEY) {
        Ok(key) => key,
        Err(_) => return false,
    };
    let Some(before) = read_default(functions, second, &key) else {
        return false;
    };
    let changed = if before == "inch" { c"cm" } else { c"inch" };
    if (functions.set_default)(first, key.as_ptr(), changed.as_ptr()) != 0 {
        return false;
    }
    let independent = read_default(functions, second, &key).is_some_and(|after| after == before);
    if !independent {
        // Shared defaults would otherwise keep the probe's value.
        if let Ok(restore) = CString::new(before) {
            (functions.set_default)(first, key.as_ptr(), restore.as_ptr());
        }
    }
    independent
}
