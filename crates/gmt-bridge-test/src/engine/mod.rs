//! An in-process engine implementing the subset of the GMT 6 API the bridge
//! calls.
//!
//! Sessions, containers and virtual files are real allocations tracked in a
//! process-wide table, so the bridge's pointer handling is exercised the
//! same way it is against libgmt. Containers follow GMT's layouts: padded
//! grids, band-interleaved input images and segmented datasets.
//!
//! Faults are injected per thread with [`inject`]; every destroyed session
//! leaves a [`SessionReport`] on the destroying thread.

mod constants;
mod modules;
mod objects;

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::ffi::{c_char, c_double, c_float, c_int, c_uint, c_void, CStr, CString};
use std::fmt;
use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicU32, Ordering};

use gmt_sys::types::{GmtUnivector, GMT_ENUM_UNKNOWN};
use gmt_sys::{GmtFunctions, PrintFunc};
use gmt_types::Region;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::trace;

use self::constants::*;
use self::objects::{GridData, ImageData, MatrixData, Object, Shape, VectorData};
use crate::status;
use crate::verification::SessionReport;

/// Version reported by the standard engine.
pub const MOCK_VERSION: (u32, u32, u32) = (6, 5, 0);
/// Version reported by [`MockVariant::OldVersion`].
pub const OLD_VERSION: (u32, u32, u32) = (6, 1, 1);

/// Longest value written by `GMT_Get_Default`, excluding the NUL.
const MAX_VALUE_LEN: usize = 255;

/// Behavior of a mock engine build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MockVariant {
    /// Independent sessions.
    #[default]
    Standard,
    /// Defaults are shared between sessions, like a library with global
    /// state.
    SharedState,
    /// `GMT_Create_Session` always returns NULL.
    NullSession,
    /// Reports GMT 6.1.1.
    OldVersion,
}

impl fmt::Display for MockVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MockVariant::Standard => write!(f, "mock-gmt"),
            MockVariant::SharedState => write!(f, "mock-gmt-shared"),
            MockVariant::NullSession => write!(f, "mock-gmt-null"),
            MockVariant::OldVersion => write!(f, "mock-gmt-old"),
        }
    }
}

/// A fault applied to the next matching call on the injecting thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The next call to this GMT function (e.g. `"GMT_Put_Vector"`) fails.
    Fail(&'static str),
    /// The next virtual file opened is given this name.
    VirtualFileName(String),
}

thread_local! {
    static FAULTS: RefCell<Vec<Fault>> = const { RefCell::new(Vec::new()) };
    pub(crate) static REPORTS: RefCell<Vec<SessionReport>> = const { RefCell::new(Vec::new()) };
}

/// Queues a fault for the calling thread.
pub fn inject(fault: Fault) {
    FAULTS.with(|faults| faults.borrow_mut().push(fault));
}

/// Drops every queued fault on the calling thread.
pub fn clear_faults() {
    FAULTS.with(|faults| faults.borrow_mut().clear());
}

fn take_failure(call: &str) -> bool {
    FAULTS.with(|faults| {
        let mut faults = faults.borrow_mut();
        let position = faults.iter().position(|f| matches!(f, Fault::Fail(c) if *c == call));
        position.map(|i| faults.remove(i)).is_some()
    })
}

fn take_name() -> Option<String> {
    FAULTS.with(|faults| {
        let mut faults = faults.borrow_mut();
        let position = faults.iter().position(|f| matches!(f, Fault::VirtualFileName(_)));
        position.and_then(|i| match faults.remove(i) {
            Fault::VirtualFileName(name) => Some(name),
            Fault::Fail(_) => None,
        })
    })
}

pub(crate) struct VirtualFile {
    pub family: c_int,
    pub output: bool,
    /// Input container; zero for outputs.
    pub object: usize,
    /// Container a module wrote, with its family.
    pub written: Option<(usize, c_int)>,
    pub read: bool,
    pub opens: usize,
}

pub(crate) struct MockSession {
    name: String,
    pad: u32,
    print: Option<PrintFunc>,
    shared: bool,
    defaults: HashMap<String, String>,
    pub vfiles: BTreeMap<String, VirtualFile>,
    pub objects: HashMap<usize, Object>,
    pub region: Option<Region>,
    pending: Vec<String>,
}

impl MockSession {
    pub(crate) fn error(&mut self, message: String) {
        self.pending.push(message);
    }

    pub(crate) fn set_default(&mut self, key: &str, value: &str) {
        if self.shared {
            SHARED_DEFAULTS.lock().insert(key.to_string(), value.to_string());
        } else {
            self.defaults.insert(key.to_string(), value.to_string());
        }
    }

    fn default_value(&self, key: &str) -> Option<String> {
        let value = match key {
            "API_VERSION" => format!("{}.{}.{}", MOCK_VERSION.0, MOCK_VERSION.1, MOCK_VERSION.2),
            "API_PAD" => self.pad.to_string(),
            "API_BINDIR" => "/opt/mock-gmt/bin".to_string(),
            "API_SHAREDIR" => "/opt/mock-gmt/share".to_string(),
            "API_LIBRARY" => "libgmt-mock".to_string(),
            "API_CORES" => "4".to_string(),
            "API_GRID_LAYOUT" => "rows".to_string(),
            "API_IMAGE_LAYOUT" => "TRB".to_string(),
            _ if self.shared => return SHARED_DEFAULTS.lock().get(key).cloned(),
            _ => return self.defaults.get(key).cloned(),
        };
        Some(value)
    }
}

fn initial_defaults() -> HashMap<String, String> {
    [
        ("PROJ_LENGTH_UNIT", "cm"),
        ("GMT_COMPATIBILITY", "6"),
        ("GMT_VERBOSE", "compat"),
        ("FORMAT_FLOAT_OUT", "%.12g"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[derive(Default)]
struct MockState {
    sessions: HashMap<usize, MockSession>,
}

// Safety: the raw pointers inside containers point into allocations owned
// by the same entry and are only touched with the state lock held.
unsafe impl Send for MockState {}

static STATE: Lazy<Mutex<MockState>> = Lazy::new(|| Mutex::new(MockState::default()));
static SHARED_DEFAULTS: Lazy<Mutex<HashMap<String, String>>> = Lazy::new(|| Mutex::new(initial_defaults()));
/// Virtual file numbers are drawn process-wide, as libgmt does.
static NEXT_VFILE: AtomicU32 = AtomicU32::new(0);

/// Number of sessions currently open across every thread.
pub fn live_sessions() -> usize {
    STATE.lock().sessions.len()
}

/// Runs `f` on the session behind `api`, then delivers anything it printed.
///
/// Returns `failed` when the handle is unknown or a fault is queued for
/// `call`.
fn with_session<R>(api: *mut c_void, call: &'static str, failed: R, f: impl FnOnce(&mut MockSession) -> R) -> R {
    let (result, print, messages) = {
        let mut state = STATE.lock();
        let Some(session) = state.sessions.get_mut(&(api as usize)) else {
            return failed;
        };
        let result = if take_failure(call) {
            session.error(format!("{} [ERROR]: injected failure", call));
            failed
        } else {
            f(session)
        };
        (result, session.print, std::mem::take(&mut session.pending))
    };
    if let Some(print) = print {
        for message in messages {
            if let Ok(text) = CString::new(message + "\n") {
                // Safety: the callback was supplied with the session.
                unsafe { print(ptr::null_mut(), text.as_ptr()) };
            }
        }
    }
    result
}

unsafe fn text<'a>(ptr: *const c_char) -> std::borrow::Cow<'a, str> {
    if ptr.is_null() {
        return "".into();
    }
    CStr::from_ptr(ptr).to_string_lossy()
}

unsafe fn write_text(buffer: *mut c_char, value: &str) {
    if buffer.is_null() {
        return;
    }
    let bytes = &value.as_bytes()[..value.len().min(MAX_VALUE_LEN)];
    ptr::copy_nonoverlapping(bytes.as_ptr().cast::<c_char>(), buffer, bytes.len());
    *buffer.add(bytes.len()) = 0;
}

unsafe fn open_session(tag: *const c_char, pad: c_uint, print: Option<PrintFunc>, shared: bool) -> *mut c_void {
    let name = text(tag).into_owned();
    if take_failure("GMT_Create_Session") {
        if let Some(print) = print {
            let message = c"GMT_Create_Session [ERROR]: injected failure\n";
            print(ptr::null_mut(), message.as_ptr());
        }
        return ptr::null_mut();
    }
    let key = Box::into_raw(Box::new(0u64)) as *mut c_void;
    trace!(session = %name, "mock session created");
    STATE.lock().sessions.insert(
        key as usize,
        MockSession {
            name,
            pad,
            print,
            shared,
            defaults: initial_defaults(),
            vfiles: BTreeMap::new(),
            objects: HashMap::new(),
            region: None,
            pending: Vec::new(),
        },
    );
    key
}

unsafe extern "C" fn create_session(
    tag: *const c_char,
    pad: c_uint,
    _mode: c_uint,
    print: Option<PrintFunc>,
) -> *mut c_void {
    open_session(tag, pad, print, false)
}

unsafe extern "C" fn create_session_shared(
    tag: *const c_char,
    pad: c_uint,
    _mode: c_uint,
    print: Option<PrintFunc>,
) -> *mut c_void {
    open_session(tag, pad, print, true)
}

unsafe extern "C" fn create_session_null(
    _tag: *const c_char,
    _pad: c_uint,
    _mode: c_uint,
    print: Option<PrintFunc>,
) -> *mut c_void {
    if let Some(print) = print {
        print(ptr::null_mut(), c"GMT_Create_Session [ERROR]: out of session slots\n".as_ptr());
    }
    ptr::null_mut()
}

unsafe extern "C" fn destroy_session(api: *mut c_void) -> c_int {
    if take_failure("GMT_Destroy_Session") {
        return status::INJECTED_FAILURE;
    }
    let Some(session) = STATE.lock().sessions.remove(&(api as usize)) else {
        return status::NOT_FOUND;
    };
    let report = SessionReport {
        name: session.name.clone(),
        open_virtual_files: session.vfiles.keys().cloned().collect(),
        live_objects: session.objects.len(),
    };
    trace!(session = %report.name, clean = report.is_clean(), "mock session destroyed");
    REPORTS.with(|reports| reports.borrow_mut().push(report));
    drop(session);
    drop(Box::from_raw(api as *mut u64));
    0
}

unsafe extern "C" fn get_enum(_api: *mut c_void, name: *const c_char) -> c_int {
    lookup(&text(name)).unwrap_or(GMT_ENUM_UNKNOWN)
}

unsafe fn report_version(
    version: (u32, u32, u32),
    major: *mut c_uint,
    minor: *mut c_uint,
    patch: *mut c_uint,
) -> c_float {
    for (out, value) in [(major, version.0), (minor, version.1), (patch, version.2)] {
        if let Some(out) = out.as_mut() {
            *out = value;
        }
    }
    version.0 as c_float + version.1 as c_float / 10.0
}

unsafe extern "C" fn get_version(
    _api: *mut c_void,
    major: *mut c_uint,
    minor: *mut c_uint,
    patch: *mut c_uint,
) -> c_float {
    report_version(MOCK_VERSION, major, minor, patch)
}

unsafe extern "C" fn get_version_old(
    _api: *mut c_void,
    major: *mut c_uint,
    minor: *mut c_uint,
    patch: *mut c_uint,
) -> c_float {
    report_version(OLD_VERSION, major, minor, patch)
}

unsafe extern "C" fn get_default(api: *mut c_void, key: *const c_char, value: *mut c_char) -> c_int {
    let key = text(key).into_owned();
    with_session(api, "GMT_Get_Default", status::INJECTED_FAILURE, |session| {
        match session.default_value(&key) {
            Some(found) => {
                write_text(value, &found);
                0
            }
            None => {
                session.error(format!("GMT_Get_Default [ERROR]: Unrecognized keyword {}", key));
                status::UNKNOWN_KEYWORD
            }
        }
    })
}

unsafe extern "C" fn set_default(api: *mut c_void, key: *const c_char, value: *const c_char) -> c_int {
    let (key, value) = (text(key).into_owned(), text(value).into_owned());
    with_session(api, "GMT_Set_Default", status::INJECTED_FAILURE, |session| {
        if key.is_empty() || key.starts_with("API_") {
            session.error(format!("GMT_Set_Default [ERROR]: {} cannot be set", key));
            return status::UNKNOWN_KEYWORD;
        }
        session.set_default(&key, &value);
        0
    })
}

unsafe extern "C" fn call_module(api: *mut c_void, module: *const c_char, _mode: c_int, args: *mut c_void) -> c_int {
    let (module, args) = (text(module).into_owned(), text(args as *const c_char).into_owned());
    with_session(api, "GMT_Call_Module", status::INJECTED_FAILURE, |session| {
        trace!(session = %session.name, %module, %args, "mock module call");
        modules::run(session, &module, &args)
    })
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn create_data(
    api: *mut c_void,
    family: c_uint,
    _geometry: c_uint,
    _mode: c_uint,
    dim: *const u64,
    wesn: *const c_double,
    inc: *const c_double,
    registration: c_uint,
    pad: c_int,
    _data: *mut c_void,
) -> *mut c_void {
    let dim = (!dim.is_null()).then(|| slice::from_raw_parts(dim, 4).to_vec());
    let wesn = (!wesn.is_null()).then(|| [*wesn, *wesn.add(1), *wesn.add(2), *wesn.add(3)]);
    let inc = (!inc.is_null()).then(|| [*inc, *inc.add(1)]);
    let pad = pad.max(0) as u32;

    with_session(api, "GMT_Create_Data", ptr::null_mut(), |session| {
        let (base, via) = split_family(family as c_int);
        let object = match (base, via, dim.as_deref()) {
            (GMT_IS_DATASET, GMT_VIA_VECTOR, Some(dim)) => {
                Object::Vector(VectorData::new(dim[0] as usize, dim[1] as usize))
            }
            (GMT_IS_DATASET, GMT_VIA_MATRIX, Some(dim)) => {
                Object::Matrix(MatrixData::new(dim[0] as usize, dim[1] as usize))
            }
            (GMT_IS_GRID, _, dim) => {
                let (Some(wesn), Some(inc)) = (wesn, inc) else {
                    session.error("GMT_Create_Data [ERROR]: grids need a region and increments".to_string());
                    return ptr::null_mut();
                };
                let shape = match dim {
                    Some(dim) => Shape {
                        n_columns: dim[0] as u32,
                        n_rows: dim[1] as u32,
                        n_bands: 1,
                        wesn,
                        inc,
                        registration,
                        pad,
                    },
                    None => Shape::from_region(wesn, inc, registration, pad),
                };
                Object::Grid(GridData::new(&shape))
            }
            (GMT_IS_IMAGE, _, Some(dim)) => {
                let shape = Shape {
                    n_columns: dim[0] as u32,
                    n_rows: dim[1] as u32,
                    n_bands: dim[2].max(1) as u32,
                    wesn: wesn.unwrap_or_default(),
                    inc: inc.unwrap_or([1.0, 1.0]),
                    registration,
                    pad,
                };
                Object::Image(ImageData::new(&shape, "TRB", false))
            }
            _ => {
                session.error(format!("GMT_Create_Data [ERROR]: cannot create family {}", family));
                return ptr::null_mut();
            }
        };
        let key = object.key();
        session.objects.insert(key, object);
        key as *mut c_void
    })
}

unsafe extern "C" fn put_vector(
    api: *mut c_void,
    object: *mut c_void,
    column: c_uint,
    type_: c_uint,
    values: *mut c_void,
) -> c_int {
    with_session(api, "GMT_Put_Vector", status::INJECTED_FAILURE, |session| {
        match session.objects.get_mut(&(object as usize)) {
            Some(Object::Vector(vector)) if (column as usize) < vector.columns.len() => {
                vector.columns[column as usize] = GmtUnivector { raw: values };
                vector.types[column as usize] = type_;
                0
            }
            _ => {
                session.error(format!("GMT_Put_Vector [ERROR]: no vector column {}", column));
                status::RUNTIME_ERROR
            }
        }
    })
}

unsafe extern "C" fn put_matrix(
    api: *mut c_void,
    object: *mut c_void,
    type_: c_uint,
    pad: c_int,
    values: *mut c_void,
) -> c_int {
    with_session(api, "GMT_Put_Matrix", status::INJECTED_FAILURE, |session| {
        match session.objects.get_mut(&(object as usize)) {
            Some(Object::Matrix(matrix)) if pad == 0 => {
                matrix.matrix.data = GmtUnivector { raw: values };
                matrix.matrix.type_ = type_;
                0
            }
            _ => {
                session.error("GMT_Put_Matrix [ERROR]: not an unpadded matrix".to_string());
                status::RUNTIME_ERROR
            }
        }
    })
}

unsafe extern "C" fn put_strings(
    api: *mut c_void,
    _family: c_uint,
    object: *mut c_void,
    array: *mut *mut c_char,
) -> c_int {
    with_session(api, "GMT_Put_Strings", status::INJECTED_FAILURE, |session| {
        match session.objects.get_mut(&(object as usize)) {
            Some(Object::Vector(vector)) if !array.is_null() => {
                let lines = (0..vector.n_rows())
                    .map(|row| {
                        let line = *array.add(row);
                        if line.is_null() {
                            CString::default()
                        } else {
                            CStr::from_ptr(line).to_owned()
                        }
                    })
                    .collect::<Vec<_>>();
                vector.set_text(lines);
                0
            }
            _ => {
                session.error("GMT_Put_Strings [ERROR]: not a vector".to_string());
                status::RUNTIME_ERROR
            }
        }
    })
}

unsafe extern "C" fn open_virtualfile(
    api: *mut c_void,
    family: c_uint,
    _geometry: c_uint,
    direction: c_uint,
    object: *mut c_void,
    name: *mut c_char,
) -> c_int {
    with_session(api, "GMT_Open_VirtualFile", status::INJECTED_FAILURE, |session| {
        let output = direction as c_int & GMT_OUT != 0;
        if !output && !session.objects.contains_key(&(object as usize)) {
            session.error("GMT_Open_VirtualFile [ERROR]: object was not created in this session".to_string());
            return status::RUNTIME_ERROR;
        }
        let assigned =
            take_name().unwrap_or_else(|| format!("@GMTAPI@-{:06}", NEXT_VFILE.fetch_add(1, Ordering::Relaxed)));
        write_text(name, &assigned);
        if !assigned.is_empty() {
            let entry = session.vfiles.entry(assigned).or_insert(VirtualFile {
                family: split_family(family as c_int).0,
                output,
                object: if output { 0 } else { object as usize },
                written: None,
                read: false,
                opens: 0,
            });
            entry.opens += 1;
        }
        0
    })
}

unsafe extern "C" fn close_virtualfile(api: *mut c_void, name: *const c_char) -> c_int {
    let name = text(name).into_owned();
    with_session(api, "GMT_Close_VirtualFile", status::INJECTED_FAILURE, |session| {
        let Some(file) = session.vfiles.get_mut(&name) else {
            session.error(format!("GMT_Close_VirtualFile [ERROR]: no virtual file {}", name));
            return status::NOT_FOUND;
        };
        file.opens -= 1;
        if file.opens > 0 {
            return 0;
        }
        if let Some(file) = session.vfiles.remove(&name) {
            if let Some((written, _)) = file.written.filter(|_| !file.read) {
                session.objects.remove(&written);
            }
        }
        0
    })
}

unsafe extern "C" fn read_virtualfile(api: *mut c_void, name: *const c_char) -> *mut c_void {
    let name = text(name).into_owned();
    with_session(api, "GMT_Read_VirtualFile", ptr::null_mut(), |session| {
        match session.vfiles.get_mut(&name) {
            Some(file) if file.output && !file.read => match file.written {
                Some((object, _)) => {
                    file.read = true;
                    object as *mut c_void
                }
                None => ptr::null_mut(),
            },
            _ => ptr::null_mut(),
        }
    })
}

unsafe extern "C" fn inquire_virtualfile(api: *mut c_void, name: *const c_char) -> c_int {
    let name = text(name).into_owned();
    with_session(api, "GMT_Inquire_VirtualFile", -1, |session| match session.vfiles.get(&name) {
        Some(file) => file.written.map_or(file.family, |(_, family)| family),
        None => -1,
    })
}

unsafe extern "C" fn destroy_data(api: *mut c_void, object: *mut c_void) -> c_int {
    let slot = object as *mut *mut c_void;
    if slot.is_null() || (*slot).is_null() {
        return 0;
    }
    let target = *slot as usize;
    let result = with_session(api, "GMT_Destroy_Data", status::INJECTED_FAILURE, |session| {
        match session.objects.remove(&target) {
            Some(_) => 0,
            None => {
                session.error("GMT_Destroy_Data [ERROR]: object was not created in this session".to_string());
                status::NOT_FOUND
            }
        }
    });
    if result == 0 {
        *slot = ptr::null_mut();
    }
    result
}

unsafe extern "C" fn extract_region(api: *mut c_void, _file: *mut c_char, wesn: *mut c_double) -> c_int {
    with_session(api, "GMT_Extract_Region", status::INJECTED_FAILURE, |session| match session.region {
        Some(region) if !wesn.is_null() => {
            for (i, value) in region.wesn().into_iter().enumerate() {
                *wesn.add(i) = value;
            }
            0
        }
        _ => {
            session.error("GMT_Extract_Region [ERROR]: no current region".to_string());
            status::RUNTIME_ERROR
        }
    })
}

/// Entry points of the mock engine.
pub fn mock_functions(variant: MockVariant) -> GmtFunctions {
    GmtFunctions {
        create_session: match variant {
            MockVariant::SharedState => create_session_shared,
            MockVariant::NullSession => create_session_null,
            MockVariant::Standard | MockVariant::OldVersion => create_session,
        },
        destroy_session,
        get_enum,
        get_version: match variant {
            MockVariant::OldVersion => get_version_old,
            _ => get_version,
        },
        get_default,
        set_default,
        call_module,
        create_data,
        put_vector,
        put_matrix,
        put_strings,
        open_virtualfile,
        close_virtualfile,
        read_virtualfile,
        inquire_virtualfile,
        destroy_data,
        extract_region,
    }
}
