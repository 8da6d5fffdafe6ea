//! Errors raised while locating and loading libgmt.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for library loading.
pub type LoadResult<T> = Result<T, LoadError>;

/// One failed attempt to open a candidate library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadAttempt {
    /// Path or bare file name handed to the dynamic loader.
    pub candidate: PathBuf,
    /// Loader error text.
    pub reason: String,
}

impl std::fmt::Display for LoadAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.candidate.display(), self.reason)
    }
}

/// Errors that can occur while loading the native library.
#[derive(Debug, Error)]
pub enum LoadError {
    /// No candidate could be opened.
    #[error("Unable to find libgmt; tried {}", format_attempts(.attempts))]
    NotFound {
        /// Every candidate tried, in order.
        attempts: Vec<LoadAttempt>,
    },

    /// The library was opened but lacks a required entry point.
    #[error("libgmt is missing symbol '{symbol}': {source}")]
    MissingSymbol {
        /// Name of the unresolved symbol.
        symbol: &'static str,
        /// Loader error.
        #[source]
        source: libloading::Error,
    },

    /// The version string reported by the library could not be parsed.
    #[error("Invalid GMT version '{version}'")]
    InvalidVersion {
        /// The offending text.
        version: String,
    },
}

fn format_attempts(attempts: &[LoadAttempt]) -> String {
    if attempts.is_empty() {
        return "no candidates".to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_lists_attempts() {
        let err = LoadError::NotFound {
            attempts: vec![
                LoadAttempt {
                    candidate: PathBuf::from("/opt/gmt/lib/libgmt.so"),
                    reason: "no such file".to_string(),
                },
                LoadAttempt {
                    candidate: PathBuf::from("libgmt.so"),
                    reason: "cannot open shared object".to_string(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("/opt/gmt/lib/libgmt.so: no such file"));
        assert!(msg.contains("libgmt.so: cannot open shared object"));
    }

    #[test]
    fn test_not_found_without_candidates() {
        let err = LoadError::NotFound { attempts: vec![] };
        assert_eq!(err.to_string(), "Unable to find libgmt; tried no candidates");
    }
}
