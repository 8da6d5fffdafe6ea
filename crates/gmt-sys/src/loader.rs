//! Discovery of the libgmt shared library.
//!
//! Candidates are tried in this order:
//!
//! 1. an explicit path supplied by the caller,
//! 2. the directory named by the `GMT_LIBRARY_PATH` environment variable
//!    (the variable name is configurable),
//! 3. the path reported by `gmt --show-library`,
//! 4. the platform's default library names, resolved by the system loader.

use std::env;
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{debug, warn};

use crate::error::{LoadAttempt, LoadError, LoadResult};

/// Default environment variable naming the directory that holds libgmt.
pub const DEFAULT_LIBRARY_ENV: &str = "GMT_LIBRARY_PATH";

/// File names of libgmt on the current platform.
pub fn platform_library_names() -> &'static [&'static str] {
    if cfg!(target_os = "windows") {
        &["gmt.dll", "gmt_w64.dll", "gmt_w32.dll"]
    } else if cfg!(target_os = "macos") {
        &["libgmt.dylib"]
    } else {
        &["libgmt.so"]
    }
}

/// Where to look for libgmt.
#[derive(Debug, Clone)]
pub struct LibrarySearch {
    /// Explicit library file, tried first.
    pub explicit: Option<PathBuf>,
    /// Environment variable naming a directory containing libgmt.
    pub env_var: String,
    /// Ask the `gmt` executable where its library lives.
    pub use_gmt_config: bool,
}

impl Default for LibrarySearch {
    fn default() -> Self {
        Self {
            explicit: None,
            env_var: DEFAULT_LIBRARY_ENV.to_string(),
            use_gmt_config: true,
        }
    }
}

impl LibrarySearch {
    /// Builds the ordered, de-duplicated candidate list.
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = Vec::new();
        let mut push = |path: PathBuf| {
            if !out.contains(&path) {
                out.push(path);
            }
        };

        if let Some(path) = &self.explicit {
            push(path.clone());
        }

        if let Some(dir) = env::var_os(&self.env_var).filter(|v| !v.is_empty()) {
            let dir = PathBuf::from(dir);
            for name in platform_library_names() {
                push(dir.join(name));
            }
        }

        if self.use_gmt_config {
            if let Some(path) = gmt_show_library() {
                push(path);
            }
        }

        for name in platform_library_names() {
            push(PathBuf::from(name));
        }

        out
    }

    /// Opens the first candidate the dynamic loader accepts.
    pub fn open(&self) -> LoadResult<(Library, PathBuf)> {
        open_first(&self.candidates())
    }
}

/// Opens the first loadable library among `candidates`.
pub fn open_first(candidates: &[PathBuf]) -> LoadResult<(Library, PathBuf)> {
    let mut attempts = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match open_one(candidate) {
            Ok(library) => {
                debug!(path = %candidate.display(), "Loaded libgmt");
                return Ok((library, candidate.clone()));
            }
            Err(reason) => {
                debug!(path = %candidate.display(), error = %reason, "libgmt candidate rejected");
                attempts.push(LoadAttempt {
                    candidate: candidate.clone(),
                    reason,
                });
            }
        }
    }
    warn!(attempts = attempts.len(), "No loadable libgmt found");
    Err(LoadError::NotFound { attempts })
}

fn open_one(candidate: &Path) -> Result<Library, String> {
    // A path with a directory component must exist; bare names are left to
    // the system search path.
    if candidate.components().count() > 1 && !candidate.exists() {
        return Err("no such file".to_string());
    }
    // Safety: loading libgmt runs its initializers, which have no
    // preconditions beyond a sane process environment.
    unsafe { Library::new(candidate) }.map_err(|e| e.to_string())
}

/// Asks `gmt --show-library` for the library path.
fn gmt_show_library() -> Option<PathBuf> {
    let output = duct::cmd!("gmt", "--show-library")
        .stderr_null()
        .read()
        .ok()?;
    let path = output.trim();
    if path.is_empty() {
        None
    } else {
        debug!(path, "gmt --show-library");
        Some(PathBuf::from(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    const TEST_ENV: &str = "GMT_SYS_TEST_LIBRARY_PATH";

    fn search() -> LibrarySearch {
        LibrarySearch {
            explicit: None,
            env_var: TEST_ENV.to_string(),
            use_gmt_config: false,
        }
    }

    #[test]
    #[serial]
    fn test_candidates_default_names_last() {
        env::remove_var(TEST_ENV);
        let candidates = search().candidates();
        let names: Vec<PathBuf> = platform_library_names().iter().map(PathBuf::from).collect();
        assert_eq!(candidates, names);
    }

    #[test]
    #[serial]
    fn test_candidates_explicit_then_env() {
        let dir = tempfile::tempdir().unwrap();
        env::set_var(TEST_ENV, dir.path());
        let mut search = search();
        search.explicit = Some(PathBuf::from("/custom/libgmt.so"));

        let candidates = search.candidates();
        env::remove_var(TEST_ENV);

        assert_eq!(candidates[0], PathBuf::from("/custom/libgmt.so"));
        assert_eq!(candidates[1], dir.path().join(platform_library_names()[0]));
    }

    #[test]
    #[serial]
    fn test_open_first_reports_every_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("libgmt-missing.so");
        let bogus = dir.path().join("libgmt-bogus.so");
        std::fs::write(&bogus, b"not a shared object").unwrap();

        let err = open_first(&[missing.clone(), bogus.clone()]).unwrap_err();
        match err {
            LoadError::NotFound { attempts } => {
                assert_eq!(attempts.len(), 2);
                assert_eq!(attempts[0].candidate, missing);
                assert_eq!(attempts[0].reason, "no such file");
                assert_eq!(attempts[1].candidate, bogus);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
