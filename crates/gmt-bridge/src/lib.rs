//! Bridge between host containers and the GMT 6 C API.
//!
//! An [`Engine`] opens [`Session`]s. Inside a session, host tables,
//! matrices, grids and images are registered as virtual files, modules are
//! run with their names as arguments, and outputs are read back into host
//! containers:
//!
//! ```no_run
//! use gmt_bridge::{BridgeConfig, Engine, ModuleArgs, OutputKind};
//! use gmt_types::Table;
//!
//! # fn main() -> gmt_bridge::BridgeResult<()> {
//! let engine = Engine::load(BridgeConfig::default())?;
//! let table = Table::default()
//!     .with_column("x", vec![1.0, 2.0, 3.0])
//!     .with_column("y", vec![4.0, 5.0, 6.0]);
//!
//! let echoed = engine.scoped(|session| {
//!     let input = session.register_input(&table)?;
//!     let output = session.register_output(OutputKind::Table)?;
//!     session.dispatch("gmtconvert", &ModuleArgs::new().arg(input.name()).output(output.name()))?;
//!     output.read_table(None)
//! })?;
//! assert_eq!(echoed.n_rows(), 3);
//! # Ok(())
//! # }
//! ```
//!
//! Every native object behind a virtual file is released exactly once,
//! on every path, and failures carry the engine's own diagnostic text.

mod args;
mod capture;
pub mod config;
pub mod error;
mod gate;
mod marshal;
mod session;
pub mod status;
mod virtualfile;

pub use args::ModuleArgs;
pub use config::{BridgeConfig, LibraryConfig, MarshalConfig, SessionConfig};
pub use error::{BridgeError, BridgeResult, ReadBackReason, RegistrationFailure, SessionFailure};
pub use gate::{GatePermit, SessionGate};
pub use session::{Engine, Session, SessionInfo};
pub use status::{GmtStatus, StatusExt};
pub use virtualfile::{Direction, HandleState, InputRef, MarshalWarning, OutputKind, VirtualFile};

pub use gmt_types::{Container, ContainerKind};

pub use gmt_sys::{LibrarySource, NativeLibrary, ThreadModel, Version};
