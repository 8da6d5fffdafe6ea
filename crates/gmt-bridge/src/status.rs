//! Native status codes.

use std::ffi::c_int;
use std::fmt;

/// A status returned by a GMT API call; zero is success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GmtStatus(c_int);

impl GmtStatus {
    /// `GMT_NOERROR`.
    pub const SUCCESS: GmtStatus = GmtStatus(0);

    pub const fn from_raw(code: c_int) -> Self {
        GmtStatus(code)
    }

    pub const fn code(&self) -> c_int {
        self.0
    }

    /// Returns true if the status indicates success.
    pub const fn is_success(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if the status indicates an error.
    pub const fn is_error(&self) -> bool {
        self.0 != 0
    }

    /// Converts to a Result, handing the failing status to the caller to
    /// wrap with context.
    pub fn into_result(self) -> Result<(), GmtStatus> {
        if self.is_success() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for GmtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_success() {
            write!(f, "GMT_NOERROR")
        } else {
            write!(f, "GMT status {}", self.0)
        }
    }
}

/// Extension trait for converting raw status codes.
pub trait StatusExt {
    /// Converts a raw status code to a Result.
    fn to_result(self) -> Result<(), GmtStatus>;
}

impl StatusExt for c_int {
    fn to_result(self) -> Result<(), GmtStatus> {
        GmtStatus::from_raw(self).into_result()
    }
}
