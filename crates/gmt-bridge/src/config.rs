//! Bridge configuration.
//!
//! Loaded from TOML; every field has a default so an empty file (or no file)
//! is a valid configuration.
//!
//! ```toml
//! [library]
//! path = "/opt/gmt/lib/libgmt.so"
//! min_version = "6.4.0"
//!
//! [session]
//! verbosity = "warning"
//! force_serialized = true
//!
//! [marshal]
//! spacing_tolerance = 1e-4
//! ```

use crate::error::{BridgeError, BridgeResult};
use gmt_sys::{LibrarySearch, Version, DEFAULT_LIBRARY_ENV};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Where and which libgmt to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Explicit library file, tried before any other location
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Environment variable naming the directory that holds libgmt
    #[serde(default = "default_env_var")]
    pub env_var: String,

    /// Ask `gmt --show-library` for the library location
    #[serde(default = "default_use_gmt_config")]
    pub use_gmt_config: bool,

    /// Oldest accepted library version
    #[serde(default = "default_min_version")]
    pub min_version: String,
}

/// Per-session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session tag passed to `GMT_Create_Session`
    #[serde(default = "default_session_name")]
    pub name: String,

    /// Grid padding (boundary rows/columns) used by the engine
    #[serde(default = "default_pad")]
    pub pad: u32,

    /// `GMT_COMPATIBILITY` applied to every session
    #[serde(default = "default_compatibility")]
    pub compatibility: u32,

    /// `GMT_VERBOSE` applied to every session
    #[serde(default = "default_verbosity")]
    pub verbosity: String,

    /// Upper bound on simultaneously open sessions when the library
    /// supports several
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,

    /// How long `open` waits for a free slot; unset waits indefinitely
    #[serde(default)]
    pub open_timeout_ms: Option<u64>,

    /// Treat the library as single-instance regardless of the probe
    #[serde(default)]
    pub force_serialized: bool,
}

/// Marshaling behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarshalConfig {
    /// Relative tolerance when checking grid coordinate spacing
    #[serde(default = "default_spacing_tolerance")]
    pub spacing_tolerance: f64,

    /// Largest integer magnitude accepted in 64-bit integer columns
    #[serde(default = "default_max_exact_integer")]
    pub max_exact_integer: u64,
}

/// Complete bridge configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub library: LibraryConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub marshal: MarshalConfig,
}

// Default functions
fn default_env_var() -> String {
    DEFAULT_LIBRARY_ENV.to_string()
}

fn default_use_gmt_config() -> bool {
    true
}

fn default_min_version() -> String {
    "6.4.0".to_string()
}

fn default_session_name() -> String {
    "gmt-bridge".to_string()
}

fn default_pad() -> u32 {
    2
}

fn default_compatibility() -> u32 {
    6
}

fn default_verbosity() -> String {
    "error".to_string()
}

fn default_max_concurrent_sessions() -> usize {
    4
}

fn default_spacing_tolerance() -> f64 {
    1e-6
}

fn default_max_exact_integer() -> u64 {
    1 << 53
}

// Default implementations
impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            path: None,
            env_var: default_env_var(),
            use_gmt_config: default_use_gmt_config(),
            min_version: default_min_version(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: default_session_name(),
            pad: default_pad(),
            compatibility: default_compatibility(),
            verbosity: default_verbosity(),
            max_concurrent_sessions: default_max_concurrent_sessions(),
            open_timeout_ms: None,
            force_serialized: false,
        }
    }
}

impl Default for MarshalConfig {
    fn default() -> Self {
        Self {
            spacing_tolerance: default_spacing_tolerance(),
            max_exact_integer: default_max_exact_integer(),
        }
    }
}

const VERBOSITY_LEVELS: &[&str] = &[
    "quiet",
    "error",
    "warning",
    "timing",
    "information",
    "compat",
    "debug",
];

impl BridgeConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> BridgeResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| BridgeError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| BridgeError::config(format!("Failed to read config file {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
            .map_err(|e| BridgeError::config(format!("{}: {}", path.display(), e)))
    }

    /// Loads a TOML file, falling back to defaults if it does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            debug!(path = %path.display(), "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Serializes to TOML.
    pub fn to_toml_string(&self) -> BridgeResult<String> {
        toml::to_string_pretty(self).map_err(|e| BridgeError::config(format!("Failed to serialize config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> BridgeResult<()> {
        self.min_version()?;

        if self.library.env_var.trim().is_empty() {
            return Err(BridgeError::config("library.env_var must not be empty"));
        }

        if self.session.name.trim().is_empty() {
            return Err(BridgeError::config("session.name must not be empty"));
        }

        if self.session.max_concurrent_sessions == 0 {
            return Err(BridgeError::config("session.max_concurrent_sessions must be > 0"));
        }

        if !VERBOSITY_LEVELS.contains(&self.session.verbosity.as_str()) {
            return Err(BridgeError::config(format!(
                "session.verbosity must be one of {}",
                VERBOSITY_LEVELS.join(", ")
            )));
        }

        if !(self.marshal.spacing_tolerance.is_finite() && self.marshal.spacing_tolerance >= 0.0) {
            return Err(BridgeError::config("marshal.spacing_tolerance must be >= 0"));
        }

        if self.marshal.max_exact_integer == 0 || self.marshal.max_exact_integer > (1 << 53) {
            return Err(BridgeError::config("marshal.max_exact_integer must be in 1..=2^53"));
        }

        Ok(())
    }

    /// Parsed minimum library version.
    pub fn min_version(&self) -> BridgeResult<Version> {
        self.library
            .min_version
            .parse()
            .map_err(|_| {
                BridgeError::config(format!("library.min_version '{}' is not a version", self.library.min_version))
            })
    }

    /// Library search order derived from the `[library]` section.
    pub fn library_search(&self) -> LibrarySearch {
        LibrarySearch {
            explicit: self.library.path.clone(),
            env_var: self.library.env_var.clone(),
            use_gmt_config: self.library.use_gmt_config,
        }
    }

    /// Get the session open timeout as Duration
    pub fn open_timeout(&self) -> Option<Duration> {
        self.session.open_timeout_ms.map(Duration::from_millis)
    }
}
