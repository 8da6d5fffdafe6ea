//! GMT library version numbers.

use std::fmt;
use std::str::FromStr;

use crate::error::LoadError;

/// A `major.minor.patch` library version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    /// Creates a version from its components.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = LoadError;

    /// Parses `6.5.0`, `6.5` or development strings such as `6.6.0_a1b2c3d`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LoadError::InvalidVersion {
            version: s.to_string(),
        };
        let core = s
            .trim()
            .split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .next()
            .unwrap_or_default();
        let mut parts = core.split('.').filter(|p| !p.is_empty());
        let major = parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
        let minor = match parts.next() {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => 0,
        };
        Ok(Self::new(major, minor, patch))
    }
}
