//! Geographic extent, node spacing and registration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A rectangular `west/east/south/north` extent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub west: f64,
    pub east: f64,
    pub south: f64,
    pub north: f64,
}

impl Region {
    pub const fn new(west: f64, east: f64, south: f64, north: f64) -> Self {
        Self {
            west,
            east,
            south,
            north,
        }
    }

    /// Builds a region from a `[w, e, s, n]` array.
    pub const fn from_wesn(wesn: [f64; 4]) -> Self {
        Self::new(wesn[0], wesn[1], wesn[2], wesn[3])
    }

    pub const fn wesn(&self) -> [f64; 4] {
        [self.west, self.east, self.south, self.north]
    }

    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// True when every bound is finite and `west <= east`, `south <= north`.
    pub fn is_valid(&self) -> bool {
        self.wesn().iter().all(|v| v.is_finite()) && self.west <= self.east && self.south <= self.north
    }
}

impl fmt::Display for Region {
    /// Formats as a `-R` argument value (`w/e/s/n`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.west, self.east, self.south, self.north)
    }
}

/// Node spacing along x and y.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Increments {
    pub x: f64,
    pub y: f64,
}

impl Increments {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Same spacing in both directions.
    pub const fn uniform(inc: f64) -> Self {
        Self::new(inc, inc)
    }

    pub const fn as_array(&self) -> [f64; 2] {
        [self.x, self.y]
    }
}

/// Whether nodes sit on cell corners or cell centres.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Registration {
    /// Nodes on grid lines; the region edges carry nodes.
    #[default]
    Gridline,
    /// Nodes at cell centres; the region edges are half a cell out.
    Pixel,
}

impl Registration {
    /// Native code (`GMT_GRID_NODE_REG` = 0, `GMT_GRID_PIXEL_REG` = 1).
    pub const fn code(&self) -> u32 {
        match self {
            Registration::Gridline => 0,
            Registration::Pixel => 1,
        }
    }

    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Registration::Gridline),
            1 => Some(Registration::Pixel),
            _ => None,
        }
    }

    /// Offset of the first node from the region edge, in increments.
    pub const fn node_offset(&self) -> f64 {
        match self {
            Registration::Gridline => 0.0,
            Registration::Pixel => 0.5,
        }
    }

    /// Number of nodes implied by an extent and spacing, before rounding.
    ///
    /// Gridline: `extent / inc + 1`. Pixel: `extent / inc`.
    pub fn nodes_for(&self, extent: f64, inc: f64) -> f64 {
        match self {
            Registration::Gridline => extent / inc + 1.0,
            Registration::Pixel => extent / inc,
        }
    }
}

impl fmt::Display for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Registration::Gridline => write!(f, "gridline"),
            Registration::Pixel => write!(f, "pixel"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_display_and_size() {
        let region = Region::new(0.0, 10.0, -5.0, 5.0);
        assert_eq!(region.to_string(), "0/10/-5/5");
        assert_eq!(region.width(), 10.0);
        assert_eq!(region.height(), 10.0);
        assert!(region.is_valid());
        assert!(!Region::new(1.0, 0.0, 0.0, 1.0).is_valid());
        assert!(!Region::new(0.0, f64::NAN, 0.0, 1.0).is_valid());
    }

    #[test]
    fn test_registration_codes() {
        assert_eq!(Registration::from_code(Registration::Pixel.code()), Some(Registration::Pixel));
        assert_eq!(Registration::from_code(7), None);
    }

    #[test]
    fn test_nodes_for() {
        assert_eq!(Registration::Gridline.nodes_for(10.0, 1.0), 11.0);
        assert_eq!(Registration::Pixel.nodes_for(10.0, 1.0), 10.0);
    }
}
