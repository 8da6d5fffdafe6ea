//! Verification helpers for bridge tests
//!
//! The mock engine records what each session still held when it was
//! destroyed. A clean report means every virtual file was closed and every
//! container destroyed.

use thiserror::Error;

use crate::engine::REPORTS;

/// Verification error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("session '{session}' was destroyed with open virtual files: {names:?}")]
    OpenVirtualFiles { session: String, names: Vec<String> },

    #[error("session '{session}' was destroyed with {count} live container(s)")]
    LiveObjects { session: String, count: usize },

    #[error("expected {expected} destroyed session(s) named '{name}', found {actual}")]
    SessionCount {
        name: String,
        expected: usize,
        actual: usize,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// State of one session at `GMT_Destroy_Session`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// Tag the session was created with.
    pub name: String,
    pub open_virtual_files: Vec<String>,
    pub live_objects: usize,
}

impl SessionReport {
    pub fn is_clean(&self) -> bool {
        self.open_virtual_files.is_empty() && self.live_objects == 0
    }

    pub fn verify(&self) -> VerifyResult<()> {
        if !self.open_virtual_files.is_empty() {
            return Err(VerificationError::OpenVirtualFiles {
                session: self.name.clone(),
                names: self.open_virtual_files.clone(),
            });
        }
        if self.live_objects > 0 {
            return Err(VerificationError::LiveObjects {
                session: self.name.clone(),
                count: self.live_objects,
            });
        }
        Ok(())
    }
}

/// Removes and returns the reports of sessions destroyed on this thread.
pub fn take_reports() -> Vec<SessionReport> {
    REPORTS.with(|reports| std::mem::take(&mut *reports.borrow_mut()))
}

/// Checks every session destroyed on this thread so far, returning the
/// reports of those named `name`.
///
/// Probe sessions opened while loading a library are checked too.
pub fn verify_clean_shutdown(name: &str) -> VerifyResult<Vec<SessionReport>> {
    let reports = take_reports();
    for report in &reports {
        report.verify()?;
    }
    Ok(reports.into_iter().filter(|r| r.name == name).collect())
}

/// Like [`verify_clean_shutdown`], also requiring exactly `expected`
/// sessions named `name`.
pub fn verify_sessions_closed(name: &str, expected: usize) -> VerifyResult<()> {
    let actual = verify_clean_shutdown(name)?.len();
    if actual != expected {
        return Err(VerificationError::SessionCount {
            name: name.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}
