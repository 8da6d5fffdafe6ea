//! Virtual files: host containers registered under engine-generated names.
//!
//! The [`Registry`] of a session is the single owner of every native object
//! behind a virtual file. Removing an entry is what releases it, so each
//! handle is released exactly once whether that happens through
//! [`VirtualFile::release`], [`crate::Session::release`], a guard going out
//! of scope, or the session closing.
//!
//! Names are also recorded in a process-wide owner table, so a name handed
//! to the wrong session is refused instead of matching a handle there.

use std::collections::{BTreeMap, HashMap};
use std::ffi::{c_char, c_void, CString};
use std::fmt;
use std::ptr;

use gmt_types::{Axis, Container, ContainerKind, Grid, Image, Matrix, Table, TableSchema};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::{BridgeError, BridgeResult};
use crate::session::Session;

/// Data direction of a virtual file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// What a module is expected to write into an output virtual file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    Table,
    Grid,
    Image,
    /// Decided by the module; discovered at read-back.
    Unknown,
}

impl OutputKind {
    /// Family and geometry names used to open the output.
    pub(crate) fn family_and_geometry(&self) -> (&'static str, &'static str) {
        match self {
            OutputKind::Table | OutputKind::Unknown => ("GMT_IS_DATASET", "GMT_IS_PLP"),
            OutputKind::Grid => ("GMT_IS_GRID", "GMT_IS_SURFACE"),
            OutputKind::Image => ("GMT_IS_IMAGE", "GMT_IS_SURFACE"),
        }
    }

    /// Returns true if a container of `kind` satisfies this expectation.
    pub fn accepts(&self, kind: ContainerKind) -> bool {
        match self {
            OutputKind::Table => kind == ContainerKind::Table,
            OutputKind::Grid => kind == ContainerKind::Grid,
            OutputKind::Image => kind == ContainerKind::Image,
            OutputKind::Unknown => true,
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKind::Table => write!(f, "table"),
            OutputKind::Grid => write!(f, "grid"),
            OutputKind::Image => write!(f, "image"),
            OutputKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// A borrowed host container to register as input.
///
/// Table columns and matrices may be handed to the engine without copying,
/// so the borrow must outlive the virtual file.
#[derive(Debug, Clone, Copy)]
pub enum InputRef<'a> {
    Table(&'a Table),
    Matrix(&'a Matrix),
    Grid(&'a Grid),
    Image(&'a Image),
}

impl InputRef<'_> {
    pub fn kind(&self) -> ContainerKind {
        match self {
            InputRef::Table(_) => ContainerKind::Table,
            InputRef::Matrix(_) => ContainerKind::Matrix,
            InputRef::Grid(_) => ContainerKind::Grid,
            InputRef::Image(_) => ContainerKind::Image,
        }
    }
}

impl<'a> From<&'a Table> for InputRef<'a> {
    fn from(table: &'a Table) -> Self {
        InputRef::Table(table)
    }
}

impl<'a> From<&'a Matrix> for InputRef<'a> {
    fn from(matrix: &'a Matrix) -> Self {
        InputRef::Matrix(matrix)
    }
}

impl<'a> From<&'a Grid> for InputRef<'a> {
    fn from(grid: &'a Grid) -> Self {
        InputRef::Grid(grid)
    }
}

impl<'a> From<&'a Image> for InputRef<'a> {
    fn from(image: &'a Image) -> Self {
        InputRef::Image(image)
    }
}

impl<'a> From<&'a Container> for InputRef<'a> {
    fn from(container: &'a Container) -> Self {
        match container {
            Container::Table(table) => InputRef::Table(table),
            Container::Matrix(matrix) => InputRef::Matrix(matrix),
            Container::Grid(grid) => InputRef::Grid(grid),
            Container::Image(image) => InputRef::Image(image),
        }
    }
}

/// Non-fatal conditions noticed while marshaling.
#[derive(Debug, Clone, PartialEq)]
pub enum MarshalWarning {
    /// Explicit grid coordinates are not evenly spaced; the engine uses the
    /// header's region and increments instead.
    IrregularSpacing { axis: Axis },
}

impl fmt::Display for MarshalWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarshalWarning::IrregularSpacing { axis } => {
                write!(f, "irregular {} coordinate spacing; using region and increments", axis)
            }
        }
    }
}

/// Lifecycle of a registered handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Registered; no successful dispatch has referenced it.
    Registered,
    /// Referenced by a successful dispatch.
    Dispatched,
    /// Output read back into a host container.
    Consumed,
}

/// Host memory the engine points into; dropped only after the native side
/// has let go.
pub(crate) enum HostBuffer {
    F32(Vec<f32>),
    F64(Vec<f64>),
    Strings {
        _owned: Vec<CString>,
        pointers: Vec<*mut c_char>,
    },
}

impl HostBuffer {
    pub(crate) fn strings(values: impl IntoIterator<Item = CString>) -> Self {
        let owned: Vec<CString> = values.into_iter().collect();
        let pointers = owned.iter().map(|s| s.as_ptr() as *mut c_char).collect();
        HostBuffer::Strings { _owned: owned, pointers }
    }

    /// Pointer handed to the engine.
    pub(crate) fn as_native_ptr(&mut self) -> *mut c_void {
        match self {
            HostBuffer::F32(v) => v.as_mut_ptr().cast(),
            HostBuffer::F64(v) => v.as_mut_ptr().cast(),
            HostBuffer::Strings { pointers, .. } => pointers.as_mut_ptr().cast(),
        }
    }
}

/// The kind a handle was registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandleKind {
    Input(ContainerKind),
    Output(OutputKind),
}

pub(crate) struct HandleEntry {
    pub kind: HandleKind,
    pub state: HandleState,
    /// Object created for an input; destroyed on release.
    pub object: *mut c_void,
    /// Object obtained by reading an output; destroyed on release.
    pub read_object: *mut c_void,
    /// Host memory the engine reads in place; only held, never read here.
    _buffers: Vec<HostBuffer>,
}

impl HandleEntry {
    pub(crate) fn input(kind: ContainerKind, object: *mut c_void, buffers: Vec<HostBuffer>) -> Self {
        Self {
            kind: HandleKind::Input(kind),
            state: HandleState::Registered,
            object,
            read_object: ptr::null_mut(),
            _buffers: buffers,
        }
    }

    pub(crate) fn output(kind: OutputKind) -> Self {
        Self {
            kind: HandleKind::Output(kind),
            state: HandleState::Registered,
            object: ptr::null_mut(),
            read_object: ptr::null_mut(),
            _buffers: Vec::new(),
        }
    }

    pub(crate) fn direction(&self) -> Direction {
        match self.kind {
            HandleKind::Input(_) => Direction::Input,
            HandleKind::Output(_) => Direction::Output,
        }
    }
}

/// Live virtual file names in the process and the session holding each.
static OWNERS: Lazy<Mutex<HashMap<String, u64>>> = Lazy::new(Default::default);

/// Handles registered in one session, keyed by name.
pub(crate) struct Registry {
    session: u64,
    entries: BTreeMap<String, HandleEntry>,
}

impl Registry {
    pub(crate) fn new(session: u64) -> Self {
        Self {
            session,
            entries: BTreeMap::new(),
        }
    }

    /// Reserves `name` for this session.
    ///
    /// Fails with the current owner when any live session, this one
    /// included, already holds the name.
    pub(crate) fn claim(&self, name: &str) -> Result<(), u64> {
        let mut owners = OWNERS.lock();
        match owners.get(name) {
            Some(&owner) => Err(owner),
            None => {
                owners.insert(name.to_string(), self.session);
                Ok(())
            }
        }
    }

    /// The other session holding `name`, if there is one.
    pub(crate) fn foreign_owner(&self, name: &str) -> Option<u64> {
        OWNERS.lock().get(name).copied().filter(|&owner| owner != self.session)
    }

    pub(crate) fn insert(&mut self, name: String, entry: HandleEntry) {
        OWNERS.lock().entry(name.clone()).or_insert(self.session);
        self.entries.insert(name, entry);
    }

    pub(crate) fn get(&self, name: &str) -> Option<&HandleEntry> {
        self.entries.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut HandleEntry> {
        self.entries.get_mut(name)
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<HandleEntry> {
        let entry = self.entries.remove(name)?;
        self.disown(name);
        Some(entry)
    }

    /// Drops this session's claim on `name`.
    pub(crate) fn disown(&self, name: &str) {
        let mut owners = OWNERS.lock();
        if owners.get(name) == Some(&self.session) {
            owners.remove(name);
        }
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Moves every handle whose name satisfies `referenced` from
    /// `Registered` to `Dispatched`.
    pub(crate) fn mark_dispatched(&mut self, referenced: impl Fn(&str) -> bool) -> usize {
        let mut marked = 0;
        for (name, entry) in self.entries.iter_mut() {
            if entry.state == HandleState::Registered && referenced(name) {
                entry.state = HandleState::Dispatched;
                marked += 1;
            }
        }
        marked
    }
}

/// A registered virtual file, released when dropped.
///
/// Borrows its session, so the session cannot be closed while the handle
/// is alive, and (for inputs) the host data, which the engine may read in
/// place.
pub struct VirtualFile<'a> {
    session: &'a Session,
    name: String,
    direction: Direction,
    warnings: Vec<MarshalWarning>,
    released: bool,
}

impl<'a> VirtualFile<'a> {
    pub(crate) fn new(session: &'a Session, name: String, direction: Direction, warnings: Vec<MarshalWarning>) -> Self {
        Self {
            session,
            name,
            direction,
            warnings,
            released: false,
        }
    }

    /// Engine-generated name, usable as an argument token.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Non-fatal conditions noticed while marshaling the input.
    pub fn warnings(&self) -> &[MarshalWarning] {
        &self.warnings
    }

    pub fn state(&self) -> Option<HandleState> {
        self.session.handle_state(&self.name)
    }

    /// Reads the output back into a host container.
    pub fn read_back(&self) -> BridgeResult<Container> {
        self.session.read_back(&self.name)
    }

    /// Reads a table output, restoring column names and types from `schema`.
    pub fn read_table(&self, schema: Option<&TableSchema>) -> BridgeResult<Table> {
        self.session.read_back_table(&self.name, schema)
    }

    /// Reads a grid output.
    pub fn read_grid(&self) -> BridgeResult<Grid> {
        let container = self.read_back()?;
        let kind = container.kind();
        container.into_grid().ok_or_else(|| unexpected(&self.name, OutputKind::Grid, kind))
    }

    /// Reads an image output.
    pub fn read_image(&self) -> BridgeResult<Image> {
        let container = self.read_back()?;
        let kind = container.kind();
        container.into_image().ok_or_else(|| unexpected(&self.name, OutputKind::Image, kind))
    }

    /// Releases the handle now, reporting failures.
    pub fn release(mut self) -> BridgeResult<()> {
        self.released = true;
        self.session.release(&self.name)
    }
}

fn unexpected(name: &str, expected: OutputKind, found: ContainerKind) -> BridgeError {
    BridgeError::read_back(name, crate::error::ReadBackReason::UnexpectedKind { expected, found })
}

impl fmt::Debug for VirtualFile<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualFile")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("released", &self.released)
            .finish()
    }
}

impl fmt::Display for VirtualFile<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Drop for VirtualFile<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.session.release(&self.name) {
            Ok(()) | Err(BridgeError::UnknownHandle { .. }) => {}
            Err(e) => warn!(handle = %self.name, error = %e, "Failed to release virtual file"),
        }
    }
}
