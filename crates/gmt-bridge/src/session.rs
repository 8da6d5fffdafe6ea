//! Session management.
//!
//! An [`Engine`] is a loaded library plus configuration and admission
//! control; it is cheap to clone and shared between threads. Each
//! [`Session`] owns one native API handle, the virtual files registered in
//! it and a cache of looked-up constants. Sessions may move between threads
//! but are never shared by two at once.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_uint, c_void, CString};
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use gmt_sys::types::{fixed_to_string, GMT_ENUM_UNKNOWN};
use gmt_sys::{GmtFunctions, NativeLibrary, ThreadModel};
use gmt_types::{Container, ContainerKind, Region, Table, TableSchema};
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::args::{validate_module_name, ModuleArgs};
use crate::capture::{capture, print_callback};
use crate::config::{BridgeConfig, MarshalConfig};
use crate::error::{BridgeError, BridgeResult, ReadBackReason, RegistrationFailure, SessionFailure};
use crate::gate::{GatePermit, SessionGate};
use crate::marshal::{self, grid, image, table, PreparedInput};
use crate::status::StatusExt;
use crate::virtualfile::{Direction, HandleEntry, HandleKind, HandleState, InputRef, OutputKind, Registry, VirtualFile};

/// Size of the buffer receiving a virtual file name.
const VF_NAME_LEN: usize = 256;
/// Size of the buffer receiving a default's value.
const DEFAULT_VALUE_LEN: usize = 10240;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);
static ENGINE: OnceCell<Engine> = OnceCell::new();

#[derive(Debug)]
struct EngineInner {
    library: Arc<NativeLibrary>,
    config: BridgeConfig,
    gate: Arc<SessionGate>,
    thread_model: ThreadModel,
}

/// Entry point for opening sessions against one GMT library.
#[derive(Debug, Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Creates an engine over an already loaded library.
    ///
    /// Fails with [`SessionFailure::IncompatibleVersion`] when the library
    /// is older than `library.min_version`.
    pub fn new(library: Arc<NativeLibrary>, config: BridgeConfig) -> BridgeResult<Self> {
        config.validate()?;
        let required = config.min_version()?;
        let found = library.version();
        if found < required {
            return Err(BridgeError::SessionCreation {
                reason: SessionFailure::IncompatibleVersion { found, required },
                native_message: String::new(),
            });
        }

        let thread_model = if config.session.force_serialized {
            ThreadModel::Serialized
        } else {
            library.thread_model()
        };
        // A library that cannot isolate sessions is gated process-wide; a
        // forced serialization only binds this engine.
        let gate = match (library.thread_model(), thread_model) {
            (ThreadModel::Serialized, _) => SessionGate::serialized(library.functions().create_session as usize),
            (ThreadModel::MultiInstance, ThreadModel::Serialized) => Arc::new(SessionGate::new(1)),
            (ThreadModel::MultiInstance, ThreadModel::MultiInstance) => {
                Arc::new(SessionGate::new(config.session.max_concurrent_sessions))
            }
        };
        let capacity = gate.capacity();
        info!(
            source = %library.source(),
            version = %found,
            %thread_model,
            capacity,
            "GMT engine ready"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                library,
                config,
                gate,
                thread_model,
            }),
        })
    }

    /// Returns the process-wide engine, loading libgmt on first use.
    ///
    /// The configuration of the first successful call is kept; later
    /// configurations are ignored.
    pub fn load(config: BridgeConfig) -> BridgeResult<Self> {
        ENGINE
            .get_or_try_init(|| {
                let library = NativeLibrary::global(&config.library_search())?;
                Self::new(library, config)
            })
            .cloned()
    }

    pub fn library(&self) -> &Arc<NativeLibrary> {
        &self.inner.library
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Effective threading model, after `force_serialized`.
    pub fn thread_model(&self) -> ThreadModel {
        self.inner.thread_model
    }

    /// Number of sessions currently open through this engine.
    pub fn open_sessions(&self) -> usize {
        self.inner.gate.open()
    }

    /// Opens a new session.
    ///
    /// Waits for a free slot when the engine is at capacity.
    pub fn open(&self) -> BridgeResult<Session> {
        let inner = &self.inner;
        let permit = inner.gate.acquire(inner.config.open_timeout())?;
        let name = CString::new(inner.config.session.name.as_str())
            .map_err(|e| BridgeError::config(format!("session.name: {}", e)))?;
        let functions = *inner.library.functions();
        let pad = inner.config.session.pad;
        let mode = inner.library.session_mode();

        // Safety: `name` outlives the call; the callback matches PrintFunc.
        let (api, native_message) =
            capture(|| unsafe { (functions.create_session)(name.as_ptr(), pad, mode, Some(print_callback)) });
        let api = NonNull::new(api).ok_or(BridgeError::SessionCreation {
            reason: SessionFailure::NullHandle,
            native_message,
        })?;

        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let session = Session {
            engine: self.clone(),
            api: Some(api),
            id,
            registry: RefCell::new(Registry::new(id)),
            enums: RefCell::new(HashMap::new()),
            permit: Some(permit),
        };
        // A configure failure drops (and closes) the session.
        session.configure()?;
        info!(session = session.id, name = %inner.config.session.name, "Opened GMT session");
        Ok(session)
    }

    /// Opens a session, runs `f` and closes the session on every path.
    pub fn scoped<R>(&self, f: impl FnOnce(&Session) -> BridgeResult<R>) -> BridgeResult<R> {
        let mut session = self.open()?;
        let result = f(&session);
        let closed = session.close();
        finish(result, closed)
    }
}

/// Library facts reported by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub version: String,
    pub pad: Option<u32>,
    pub bindir: String,
    pub sharedir: String,
    pub library: String,
    pub cores: Option<u32>,
    pub grid_layout: String,
    pub image_layout: String,
}

/// One native GMT session.
///
/// Closed explicitly with [`Session::close`] or on drop. Every operation on
/// a closed session fails with [`BridgeError::SessionClosed`].
pub struct Session {
    engine: Engine,
    api: Option<NonNull<c_void>>,
    id: u64,
    registry: RefCell<Registry>,
    enums: RefCell<HashMap<String, c_int>>,
    permit: Option<GatePermit>,
}

// Safety: the native handle is only used through `&Session`/`&mut Session`,
// and `RefCell` keeps the type `!Sync`, so one thread at a time uses it.
unsafe impl Send for Session {}

impl Session {
    /// Process-unique session number.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn is_closed(&self) -> bool {
        self.api.is_none()
    }

    /// Number of virtual files currently registered.
    pub fn open_handles(&self) -> usize {
        self.registry.borrow().len()
    }

    /// Registers a host container as an input virtual file.
    ///
    /// The container is validated before anything is created in the engine.
    pub fn register_input<'a>(&'a self, input: impl Into<InputRef<'a>>) -> BridgeResult<VirtualFile<'a>> {
        let input = input.into();
        self.api("register an input")?;
        let prepared = marshal::prepare_input(self, input)?;
        let family = self.flags(prepared.family)?;
        let geometry = self.flags(prepared.geometry)?;
        let what = format!("input {}", input.kind());
        let name = self.open_virtualfile(&what, family, geometry, "GMT_IN|GMT_IS_REFERENCE", prepared.object.as_ptr())?;

        let PreparedInput {
            object,
            buffers,
            warnings,
            ..
        } = prepared;
        for warning in &warnings {
            warn!(session = self.id, handle = %name, "{}", warning);
        }
        self.registry
            .borrow_mut()
            .insert(name.clone(), HandleEntry::input(input.kind(), object.into_raw(), buffers));
        debug!(session = self.id, handle = %name, kind = %input.kind(), "Registered input");
        Ok(VirtualFile::new(self, name, Direction::Input, warnings))
    }

    /// Registers an empty virtual file for a module to write into.
    pub fn register_output(&self, kind: OutputKind) -> BridgeResult<VirtualFile<'_>> {
        self.api("register an output")?;
        let (family, geometry) = kind.family_and_geometry();
        let family = self.flags(family)?;
        let geometry = self.flags(geometry)?;
        let what = format!("{} output", kind);
        let name = self.open_virtualfile(&what, family, geometry, "GMT_OUT|GMT_IS_REFERENCE", ptr::null_mut())?;
        self.registry.borrow_mut().insert(name.clone(), HandleEntry::output(kind));
        debug!(session = self.id, handle = %name, %kind, "Registered output");
        Ok(VirtualFile::new(self, name, Direction::Output, Vec::new()))
    }

    /// Runs a module.
    ///
    /// On success every registered handle named in `args` becomes
    /// dispatched; on failure no handle changes state.
    pub fn dispatch(&self, module: &str, args: &ModuleArgs) -> BridgeResult<()> {
        self.api("run a module")?;
        let module_name = validate_module_name(module)?;
        let command = args.to_command_line()?;
        let mode = self.get_enum("GMT_MODULE_CMD")?;
        debug!(session = self.id, module, args = %args, "Dispatching module");

        // Safety: both strings outlive the call; the engine only reads them.
        let (status, native_message) = self.native("run a module", |f, api| unsafe {
            (f.call_module)(api, module_name.as_ptr(), mode, command.as_ptr() as *mut c_void)
        })?;
        if let Err(status) = status.to_result() {
            return Err(BridgeError::ModuleExecution {
                module: module.to_string(),
                status: status.code(),
                native_message,
            });
        }

        let marked = self.registry.borrow_mut().mark_dispatched(|name| args.references(name));
        debug!(session = self.id, module, marked, "Module finished");
        Ok(())
    }

    /// Reads an output back into a host container.
    pub fn read_back(&self, name: &str) -> BridgeResult<Container> {
        let (kind, object) = self.take_output(name, None)?;
        // Safety: `object` came from GMT_Read_VirtualFile for a family of
        // `kind` and stays alive until the handle is released.
        unsafe {
            match kind {
                ContainerKind::Table => table::from_native_table(object.cast(), None, name).map(Container::Table),
                ContainerKind::Grid => grid::from_native_grid(object.cast(), name).map(Container::Grid),
                ContainerKind::Image => image::from_native_image(object.cast(), name).map(Container::Image),
                ContainerKind::Matrix => Err(BridgeError::malformed(name, "matrix outputs are not converted")),
            }
        }
    }

    /// Reads a table output, restoring names and types from `schema`.
    pub fn read_back_table(&self, name: &str, schema: Option<&TableSchema>) -> BridgeResult<Table> {
        let (_, object) = self.take_output(name, Some(OutputKind::Table))?;
        // Safety: the engine reported a dataset for this handle.
        unsafe { table::from_native_table(object.cast(), schema, name) }
    }

    /// Releases a virtual file and everything the engine holds for it.
    ///
    /// The handle is removed first, so a second release reports
    /// [`BridgeError::UnknownHandle`] and never frees anything twice. A name
    /// held by another session is [`BridgeError::ForeignHandle`].
    pub fn release(&self, name: &str) -> BridgeResult<()> {
        let entry = self.registry.borrow_mut().remove(name);
        let entry = entry.ok_or_else(|| self.missing_handle(name))?;
        self.release_entry(name, entry)
    }

    pub fn handle_state(&self, name: &str) -> Option<HandleState> {
        self.registry.borrow().get(name).map(|entry| entry.state)
    }

    /// Looks up a named GMT constant, caching the result.
    pub fn get_enum(&self, name: &str) -> BridgeResult<i32> {
        if let Some(&value) = self.enums.borrow().get(name) {
            return Ok(value);
        }
        let key = CString::new(name).map_err(|e| BridgeError::invalid_argument(format!("constant name: {}", e)))?;
        // Safety: `key` outlives the call.
        let (value, _) = self.native("look up a constant", |f, api| unsafe { (f.get_enum)(api, key.as_ptr()) })?;
        if value == GMT_ENUM_UNKNOWN {
            return Err(BridgeError::invalid_argument(format!("unknown GMT constant '{}'", name)));
        }
        self.enums.borrow_mut().insert(name.to_string(), value);
        Ok(value)
    }

    /// Reads a GMT default (e.g. `PROJ_LENGTH_UNIT`) or API parameter.
    pub fn get_default(&self, key: &str) -> BridgeResult<String> {
        let key_c = CString::new(key).map_err(|e| BridgeError::invalid_argument(format!("default name: {}", e)))?;
        let mut value = vec![0 as c_char; DEFAULT_VALUE_LEN];
        // Safety: `value` is large enough for any default the engine writes.
        let (status, native_message) = self.native("read a default", |f, api| unsafe {
            (f.get_default)(api, key_c.as_ptr(), value.as_mut_ptr())
        })?;
        status.to_result().map_err(|status| BridgeError::Native {
            call: "GMT_Get_Default",
            status: status.code(),
            native_message,
        })?;
        Ok(fixed_to_string(&value))
    }

    /// Sets a GMT default for this session only.
    pub fn set_default(&self, key: &str, value: &str) -> BridgeResult<()> {
        let key_c = CString::new(key).map_err(|e| BridgeError::invalid_argument(format!("default name: {}", e)))?;
        let value_c =
            CString::new(value).map_err(|e| BridgeError::invalid_argument(format!("default value: {}", e)))?;
        // Safety: both strings outlive the call.
        let (status, native_message) = self.native("set a default", |f, api| unsafe {
            (f.set_default)(api, key_c.as_ptr(), value_c.as_ptr())
        })?;
        status.to_result().map_err(|status| BridgeError::Native {
            call: "GMT_Set_Default",
            status: status.code(),
            native_message,
        })
    }

    /// Library facts exposed through the `API_*` parameters.
    pub fn info(&self) -> BridgeResult<SessionInfo> {
        Ok(SessionInfo {
            version: self.get_default("API_VERSION")?,
            pad: self.get_default("API_PAD")?.trim().parse().ok(),
            bindir: self.get_default("API_BINDIR")?,
            sharedir: self.get_default("API_SHAREDIR")?,
            library: self.get_default("API_LIBRARY")?,
            cores: self.get_default("API_CORES")?.trim().parse().ok(),
            grid_layout: self.get_default("API_GRID_LAYOUT")?,
            image_layout: self.get_default("API_IMAGE_LAYOUT")?,
        })
    }

    /// Region of the current figure or plotting history.
    pub fn extract_region(&self) -> BridgeResult<Region> {
        let mut wesn = [0.0f64; 4];
        // Safety: `wesn` has room for the four doubles written.
        let (status, native_message) = self.native("extract the region", |f, api| unsafe {
            (f.extract_region)(api, ptr::null_mut(), wesn.as_mut_ptr())
        })?;
        status.to_result().map_err(|status| BridgeError::Native {
            call: "GMT_Extract_Region",
            status: status.code(),
            native_message,
        })?;
        Ok(Region::from_wesn(wesn))
    }

    /// Registers `input`, runs `f` with it and releases it on every path.
    pub fn with_input<'a, R>(
        &'a self,
        input: impl Into<InputRef<'a>>,
        f: impl FnOnce(&VirtualFile<'a>) -> BridgeResult<R>,
    ) -> BridgeResult<R> {
        let file = self.register_input(input)?;
        let result = f(&file);
        finish(result, file.release())
    }

    /// Registers an output of `kind`, runs `f` with it and releases it on
    /// every path.
    pub fn with_output<R>(
        &self,
        kind: OutputKind,
        f: impl FnOnce(&VirtualFile<'_>) -> BridgeResult<R>,
    ) -> BridgeResult<R> {
        let file = self.register_output(kind)?;
        let result = f(&file);
        finish(result, file.release())
    }

    /// Registers `inputs` and an optional output, runs `module` with the
    /// arguments `build` makes from their names, and reads the output back.
    ///
    /// All handles are released before returning, whether or not the
    /// module succeeded.
    pub fn run_module<'a>(
        &'a self,
        module: &str,
        inputs: &[InputRef<'a>],
        output: Option<OutputKind>,
        build: impl FnOnce(&[&str], Option<&str>) -> ModuleArgs,
    ) -> BridgeResult<Option<Container>> {
        let files = inputs
            .iter()
            .map(|&input| self.register_input(input))
            .collect::<BridgeResult<Vec<_>>>()?;
        let out = output.map(|kind| self.register_output(kind)).transpose()?;

        let names: Vec<&str> = files.iter().map(VirtualFile::name).collect();
        let args = build(&names, out.as_ref().map(VirtualFile::name));
        let result = self
            .dispatch(module, &args)
            .and_then(|()| out.as_ref().map(VirtualFile::read_back).transpose());

        let mut released = Ok(());
        for file in files.into_iter().chain(out) {
            let outcome = file.release();
            if released.is_ok() {
                released = outcome;
            }
        }
        finish(result, released)
    }

    /// Closes the session, releasing any handles still registered.
    ///
    /// Closing an already closed session is a no-op.
    pub fn close(&mut self) -> BridgeResult<()> {
        if self.api.is_none() {
            warn!(session = self.id, "Session already closed");
            return Ok(());
        }

        let mut first_error = None;
        let leftovers = self.registry.borrow().names();
        for name in leftovers {
            let entry = self.registry.borrow_mut().remove(&name);
            if let Some(entry) = entry {
                warn!(session = self.id, handle = %name, "Releasing virtual file left open at close");
                if let Err(e) = self.release_entry(&name, entry) {
                    first_error.get_or_insert(e);
                }
            }
        }

        let destroyed = match self.api.take() {
            Some(api) => {
                let functions = *self.functions();
                // Safety: `api` came from GMT_Create_Session and is destroyed
                // exactly once because it was just taken.
                let (status, native_message) = capture(|| unsafe { (functions.destroy_session)(api.as_ptr()) });
                status.to_result().map_err(|status| BridgeError::Native {
                    call: "GMT_Destroy_Session",
                    status: status.code(),
                    native_message,
                })
            }
            None => Ok(()),
        };
        self.enums.borrow_mut().clear();
        self.permit.take();
        info!(session = self.id, "Closed GMT session");

        destroyed?;
        first_error.map_or(Ok(()), Err)
    }

    fn configure(&self) -> BridgeResult<()> {
        let config = &self.engine.inner.config.session;
        let settings = [
            ("GMT_COMPATIBILITY", config.compatibility.to_string()),
            ("GMT_VERBOSE", config.verbosity.clone()),
        ];
        for (key, value) in settings {
            self.set_default(key, &value).map_err(|e| match e {
                BridgeError::Native {
                    status, native_message, ..
                } => BridgeError::SessionCreation {
                    reason: SessionFailure::Configure {
                        key: key.to_string(),
                        status,
                    },
                    native_message,
                },
                other => other,
            })?;
        }
        Ok(())
    }

    fn api(&self, operation: &'static str) -> BridgeResult<*mut c_void> {
        self.api
            .map(NonNull::as_ptr)
            .ok_or(BridgeError::SessionClosed { operation })
    }

    pub(crate) fn functions(&self) -> &GmtFunctions {
        self.engine.inner.library.functions()
    }

    pub(crate) fn marshal_config(&self) -> &MarshalConfig {
        &self.engine.inner.config.marshal
    }

    /// Grid padding requested for this session.
    pub(crate) fn pad(&self) -> u32 {
        self.engine.inner.config.session.pad
    }

    /// Runs `f` against the native handle, capturing what the engine prints.
    pub(crate) fn native<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&GmtFunctions, *mut c_void) -> R,
    ) -> BridgeResult<(R, String)> {
        let api = self.api(operation)?;
        let functions = self.functions();
        Ok(capture(|| f(functions, api)))
    }

    /// ORs together the constants named in `spec`, e.g.
    /// `"GMT_IS_DATASET|GMT_VIA_VECTOR"`.
    pub(crate) fn flags(&self, spec: &str) -> BridgeResult<c_uint> {
        spec.split('|')
            .map(str::trim)
            .try_fold(0, |acc, name| -> BridgeResult<c_uint> { Ok(acc | self.get_enum(name)? as c_uint) })
    }

    /// Creates an empty native container.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn create_data(
        &self,
        what: &str,
        family: &str,
        geometry: &str,
        mode: &str,
        dim: Option<[u64; 4]>,
        wesn: Option<[f64; 4]>,
        inc: Option<[f64; 2]>,
        registration: u32,
        pad: i32,
    ) -> BridgeResult<NativeObject<'_>> {
        let family = self.flags(family)?;
        let geometry = self.flags(geometry)?;
        let mode = self.flags(mode)?;
        let dim_ptr = dim.as_ref().map_or(ptr::null(), |d| d.as_ptr());
        let wesn_ptr = wesn.as_ref().map_or(ptr::null(), |w| w.as_ptr());
        let inc_ptr = inc.as_ref().map_or(ptr::null(), |i| i.as_ptr());

        // Safety: the optional arrays live on this frame for the call.
        let (object, native_message) = self.native("create data", |f, api| unsafe {
            (f.create_data)(
                api,
                family,
                geometry,
                mode,
                dim_ptr,
                wesn_ptr,
                inc_ptr,
                registration,
                pad,
                ptr::null_mut(),
            )
        })?;
        NonNull::new(object)
            .map(|ptr| NativeObject { session: self, ptr })
            .ok_or_else(|| BridgeError::registration(what, RegistrationFailure::CreateData, native_message))
    }

    /// Points column `index` of a vector container at `values`.
    pub(crate) fn put_vector(
        &self,
        object: &NativeObject<'_>,
        column: &str,
        index: usize,
        type_name: &str,
        values: *mut c_void,
    ) -> BridgeResult<()> {
        let type_ = self.flags(type_name)?;
        // Safety: `values` stays alive while the handle is registered.
        let (status, native_message) = self.native("attach a column", |f, api| unsafe {
            (f.put_vector)(api, object.as_ptr(), index as c_uint, type_, values)
        })?;
        status.to_result().map_err(|_| {
            BridgeError::registration(
                "input table",
                RegistrationFailure::PutVector {
                    column: column.to_string(),
                },
                native_message,
            )
        })
    }

    /// Points a matrix container at `values`.
    pub(crate) fn put_matrix(
        &self,
        object: &NativeObject<'_>,
        type_name: &str,
        pad: i32,
        values: *mut c_void,
    ) -> BridgeResult<()> {
        let type_ = self.flags(type_name)?;
        // Safety: `values` stays alive while the handle is registered.
        let (status, native_message) = self.native("attach matrix data", |f, api| unsafe {
            (f.put_matrix)(api, object.as_ptr(), type_, pad, values)
        })?;
        status
            .to_result()
            .map_err(|_| BridgeError::registration("input matrix", RegistrationFailure::PutMatrix, native_message))
    }

    /// Attaches trailing text to a vector container.
    pub(crate) fn put_strings(
        &self,
        object: &NativeObject<'_>,
        family: &str,
        strings: *mut c_void,
    ) -> BridgeResult<()> {
        let family = self.flags(family)?;
        // Safety: `strings` is an array of one C string per row.
        let (status, native_message) = self.native("attach text", |f, api| unsafe {
            (f.put_strings)(api, family, object.as_ptr(), strings.cast())
        })?;
        status
            .to_result()
            .map_err(|_| BridgeError::registration("input table", RegistrationFailure::PutStrings, native_message))
    }

    fn open_virtualfile(
        &self,
        what: &str,
        family: c_uint,
        geometry: c_uint,
        direction: &str,
        object: *mut c_void,
    ) -> BridgeResult<String> {
        let direction = self.flags(direction)?;
        let mut buffer = [0 as c_char; VF_NAME_LEN];
        // Safety: `buffer` has room for any name the engine writes.
        let (status, native_message) = self.native("open a virtual file", |f, api| unsafe {
            (f.open_virtualfile)(api, family, geometry, direction, object, buffer.as_mut_ptr())
        })?;
        if status.to_result().is_err() {
            return Err(BridgeError::registration(what, RegistrationFailure::OpenVirtualFile, native_message));
        }

        let name = fixed_to_string(&buffer);
        let reason = if name.trim().is_empty() || name.chars().any(char::is_whitespace) {
            Some(RegistrationFailure::InvalidName { name: name.clone() })
        } else if let Err(owner) = self.registry.borrow().claim(&name) {
            debug!(session = self.id, handle = %name, owner, "Engine reused a live virtual file name");
            Some(RegistrationFailure::DuplicateName { name: name.clone() })
        } else {
            None
        };
        match reason {
            Some(reason) => {
                if !name.is_empty() {
                    if let Err(e) = self.close_virtualfile(&name) {
                        warn!(session = self.id, handle = %name, error = %e, "Failed to close rejected virtual file");
                    }
                }
                Err(BridgeError::registration(what, reason, String::new()))
            }
            None => Ok(name),
        }
    }

    fn missing_handle(&self, name: &str) -> BridgeError {
        match self.registry.borrow().foreign_owner(name) {
            Some(owner) => BridgeError::ForeignHandle {
                name: name.to_string(),
                owner,
            },
            None => BridgeError::UnknownHandle { name: name.to_string() },
        }
    }

    fn close_virtualfile(&self, name: &str) -> BridgeResult<()> {
        let name_c = CString::new(name).map_err(|e| BridgeError::invalid_argument(format!("handle name: {}", e)))?;
        // Safety: `name_c` outlives the call.
        let (status, native_message) = self.native("close a virtual file", |f, api| unsafe {
            (f.close_virtualfile)(api, name_c.as_ptr())
        })?;
        status.to_result().map_err(|status| BridgeError::Native {
            call: "GMT_Close_VirtualFile",
            status: status.code(),
            native_message,
        })
    }

    /// Destroys a native container created or read in this session.
    fn destroy_object(&self, object: *mut c_void) -> BridgeResult<()> {
        let mut object = object;
        // Safety: GMT_Destroy_Data takes the address of the object pointer
        // and clears it.
        let (status, native_message) = self.native("destroy data", |f, api| unsafe {
            (f.destroy_data)(api, (&mut object as *mut *mut c_void).cast())
        })?;
        status.to_result().map_err(|status| BridgeError::Native {
            call: "GMT_Destroy_Data",
            status: status.code(),
            native_message,
        })
    }

    fn release_entry(&self, name: &str, entry: HandleEntry) -> BridgeResult<()> {
        let mut first_error = None;
        if let Err(e) = self.close_virtualfile(name) {
            first_error.get_or_insert(e);
        }
        if !entry.read_object.is_null() && entry.read_object != entry.object {
            if let Err(e) = self.destroy_object(entry.read_object) {
                first_error.get_or_insert(e);
            }
        }
        if !entry.object.is_null() {
            if let Err(e) = self.destroy_object(entry.object) {
                first_error.get_or_insert(e);
            }
        }
        let direction = entry.direction();
        // Host buffers go only after the engine has let go of them.
        drop(entry);
        debug!(session = self.id, handle = %name, %direction, "Released virtual file");
        first_error.map_or(Ok(()), Err)
    }

    /// Validates an output handle and reads its native container.
    fn take_output(&self, name: &str, require: Option<OutputKind>) -> BridgeResult<(ContainerKind, *mut c_void)> {
        self.api("read back an output")?;
        let expected = {
            let registry = self.registry.borrow();
            let entry = registry.get(name).ok_or_else(|| self.missing_handle(name))?;
            let declared = match entry.kind {
                HandleKind::Input(_) => return Err(BridgeError::read_back(name, ReadBackReason::NotAnOutput)),
                HandleKind::Output(kind) => kind,
            };
            match entry.state {
                HandleState::Registered => return Err(BridgeError::read_back(name, ReadBackReason::NotDispatched)),
                HandleState::Consumed => return Err(BridgeError::read_back(name, ReadBackReason::AlreadyConsumed)),
                HandleState::Dispatched => {}
            }
            declared
        };

        let name_c = CString::new(name).map_err(|e| BridgeError::invalid_argument(format!("handle name: {}", e)))?;
        // Safety: `name_c` outlives the call.
        let (family, _) = self.native("inquire a virtual file", |f, api| unsafe {
            (f.inquire_virtualfile)(api, name_c.as_ptr())
        })?;
        let found = self
            .container_kind(family)?
            .ok_or_else(|| BridgeError::read_back(name, ReadBackReason::UnrecognizedKind { family }))?;
        for expected in std::iter::once(expected).chain(require) {
            if !expected.accepts(found) {
                return Err(BridgeError::read_back(name, ReadBackReason::UnexpectedKind { expected, found }));
            }
        }

        // Safety: `name_c` outlives the call.
        let (object, _) = self.native("read a virtual file", |f, api| unsafe {
            (f.read_virtualfile)(api, name_c.as_ptr())
        })?;
        if object.is_null() {
            return Err(BridgeError::read_back(name, ReadBackReason::NotPopulated));
        }
        if let Some(entry) = self.registry.borrow_mut().get_mut(name) {
            entry.read_object = object;
            entry.state = HandleState::Consumed;
        }
        debug!(session = self.id, handle = %name, kind = %found, "Read back output");
        Ok((found, object))
    }

    fn container_kind(&self, family: c_int) -> BridgeResult<Option<ContainerKind>> {
        let kinds = [
            ("GMT_IS_DATASET", ContainerKind::Table),
            ("GMT_IS_GRID", ContainerKind::Grid),
            ("GMT_IS_IMAGE", ContainerKind::Image),
        ];
        for (name, kind) in kinds {
            if self.get_enum(name)? == family {
                return Ok(Some(kind));
            }
        }
        Ok(None)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("handles", &self.registry.borrow().names())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.api.is_some() {
            if let Err(e) = self.close() {
                warn!(session = self.id, error = %e, "Failed to close GMT session");
            }
        }
    }
}

/// A native container owned by the bridge until handed to the registry.
pub(crate) struct NativeObject<'s> {
    session: &'s Session,
    ptr: NonNull<c_void>,
}

impl NativeObject<'_> {
    pub(crate) fn as_ptr(&self) -> *mut c_void {
        self.ptr.as_ptr()
    }

    /// Gives up ownership; the caller must destroy the object.
    pub(crate) fn into_raw(self) -> *mut c_void {
        let ptr = self.ptr.as_ptr();
        std::mem::forget(self);
        ptr
    }
}

impl Drop for NativeObject<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.session.destroy_object(self.ptr.as_ptr()) {
            warn!(session = self.session.id, error = %e, "Failed to destroy native container");
        }
    }
}

/// Combines an operation's result with the outcome of cleaning up after it.
///
/// The operation's own error wins; a cleanup error surfaces only when the
/// operation succeeded.
fn finish<R>(result: BridgeResult<R>, cleanup: BridgeResult<()>) -> BridgeResult<R> {
    match (result, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(cleanup)) => {
            warn!(error = %cleanup, "Cleanup failed after an earlier error");
            Err(e)
        }
    }
}
