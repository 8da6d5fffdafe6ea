//! Raw access to the GMT 6 C API.
//!
//! This crate knows how to find and open `libgmt`, resolve the entry points
//! the bridge uses, and lays out the C container structs. It performs no
//! marshaling and holds no session state; see `gmt-bridge` for that.

pub mod api;
pub mod error;
pub mod library;
pub mod loader;
pub mod types;
pub mod version;

pub use api::{GmtFunctions, PrintFunc, REQUIRED_SYMBOLS};
pub use error::{LoadAttempt, LoadError, LoadResult};
pub use library::{LibrarySource, NativeLibrary, ThreadModel};
pub use loader::{platform_library_names, LibrarySearch, DEFAULT_LIBRARY_ENV};
pub use version::Version;
