//! Waypoints and raster directions.

use serde::{Deserialize, Serialize};

/// One position + process-parameter sample along a segment's path.
///
/// Positions are machine coordinates in mm, `theta` is the rotary axis
/// angle in degrees. `feed` and `extrusion` are the only fields the
/// correction stage is allowed to change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Rotary axis angle in degrees.
    pub theta: f64,
    /// Feed rate (mm/s).
    pub feed: f64,
    /// Extruder set-point (auger voltage or flow command).
    pub extrusion: f64,
    /// Target deposited width (mm).
    pub width: f64,
}

impl Waypoint {
    /// Waypoint at `(x, y, z)` with zeroed process parameters.
    pub fn at(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            theta: 0.0,
            feed: 0.0,
            extrusion: 0.0,
            width: 0.0,
        }
    }

    /// Planar position in mm.
    #[inline]
    pub fn xy(&self) -> [f64; 2] {
        [self.x, self.y]
    }

    /// True if `other` differs from `self` only in `feed` / `extrusion`.
    pub fn same_geometry(&self, other: &Waypoint) -> bool {
        self.x == other.x
            && self.y == other.y
            && self.z == other.z
            && self.theta == other.theta
            && self.width == other.width
    }
}

/// Travel direction of an axis-aligned raster segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrintDir {
    XPos,
    YPos,
    XNeg,
    YNeg,
}

impl PrintDir {
    /// Direction of travel from `a` to `b`, preferring the x axis.
    ///
    /// Returns `None` for coincident points.
    pub fn from_points(a: [f64; 2], b: [f64; 2]) -> Option<Self> {
        let dx = b[0] - a[0];
        let dy = b[1] - a[1];
        if dx > 0.0 {
            Some(Self::XPos)
        } else if dx < 0.0 {
            Some(Self::XNeg)
        } else if dy > 0.0 {
            Some(Self::YPos)
        } else if dy < 0.0 {
            Some(Self::YNeg)
        } else {
            None
        }
    }

    /// True for travel along the x axis.
    #[inline]
    pub fn is_x(self) -> bool {
        matches!(self, Self::XPos | Self::XNeg)
    }

    /// Unit vector of travel.
    pub fn unit(self) -> [f64; 2] {
        match self {
            Self::XPos => [1.0, 0.0],
            Self::XNeg => [-1.0, 0.0],
            Self::YPos => [0.0, 1.0],
            Self::YNeg => [0.0, -1.0],
        }
    }

    /// Rotary-axis angle (deg) that puts the scanner behind the nozzle.
    pub fn theta_deg(self) -> f64 {
        match self {
            Self::XPos => 0.0,
            Self::YPos => 90.0,
            Self::XNeg => 180.0,
            Self::YNeg => 270.0,
        }
    }
}
