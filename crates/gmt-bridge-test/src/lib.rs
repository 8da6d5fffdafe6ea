//! Test infrastructure for the GMT bridge
//!
//! Provides:
//! - An in-process engine implementing the GMT API entry points the bridge
//!   uses, with fault injection
//! - Host container fixtures
//! - Leak verification from per-session shutdown reports

mod engine;
pub mod fixtures;
mod verification;

use std::sync::Arc;

use gmt_sys::NativeLibrary;
use tracing_subscriber::EnvFilter;

pub use engine::{clear_faults, inject, live_sessions, mock_functions, Fault, MockVariant, MOCK_VERSION, OLD_VERSION};
pub use fixtures::*;
pub use verification::*;

/// Status codes returned by the mock engine.
pub mod status {
    /// `GMT_Call_Module` was given a module name it does not know.
    pub const MODULE_NOT_FOUND: i32 = 71;
    /// A module or data call rejected its input.
    pub const RUNTIME_ERROR: i32 = 72;
    /// `GMT_Get_Default`/`GMT_Set_Default` on an unknown or read-only key.
    pub const UNKNOWN_KEYWORD: i32 = 73;
    /// A handle, virtual file or container the session does not own.
    pub const NOT_FOUND: i32 = 74;
    /// Returned by a call failed through [`crate::Fault::Fail`].
    pub const INJECTED_FAILURE: i32 = 99;
}

/// The standard mock library.
pub fn mock_library() -> Arc<NativeLibrary> {
    mock_library_variant(MockVariant::Standard)
}

/// A mock library with the given behavior.
///
/// Loading runs the usual version query and capability probe against the
/// mock, so the probe's sessions appear in [`take_reports`].
pub fn mock_library_variant(variant: MockVariant) -> Arc<NativeLibrary> {
    // Safety: the mock entry points are plain functions in this crate and
    // stay callable for the life of the process.
    let library = unsafe { NativeLibrary::from_functions(mock_functions(variant), variant.to_string()) };
    Arc::new(library.expect("mock library reports a valid version"))
}

/// Routes `tracing` output to the test harness.
///
/// Honors `RUST_LOG`; defaults to `debug`. Safe to call from every test.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use gmt_sys::ThreadModel;

    #[test]
    fn test_standard_library_is_multi_instance() {
        let library = mock_library();
        assert_eq!(library.thread_model(), ThreadModel::MultiInstance);
        assert_eq!(library.version().to_string(), "6.5.0");
        assert!(take_reports().iter().all(SessionReport::is_clean));
    }

    #[test]
    fn test_variants() {
        assert_eq!(
            mock_library_variant(MockVariant::SharedState).thread_model(),
            ThreadModel::Serialized
        );
        assert_eq!(
            mock_library_variant(MockVariant::NullSession).thread_model(),
            ThreadModel::Serialized
        );
        assert_eq!(
            mock_library_variant(MockVariant::OldVersion).version().to_string(),
            "6.1.1"
        );
    }
}
