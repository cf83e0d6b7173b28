//! Payloads exchanged between stages.
//!
//! Each message carries the index of the segment it describes. Messages are
//! immutable once pushed; the receiving stage takes ownership.

use image::GrayImage;

use crate::plan::Waypoint;

/// Scan → error extraction: boundary pixels accumulated up to the moment a
/// segment finished scanning.
#[derive(Debug, Clone)]
pub struct ScanMsg {
    /// Boundary bitmap in raster pixels (255 = boundary pixel).
    pub boundary: GrayImage,
    pub segment: usize,
    /// True for the final segment; terminates the extraction stage.
    pub last: bool,
}

/// Error extraction → correction: per-waypoint errors of one segment.
///
/// Both arrays are empty when no boundary was found on one or both sides.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMsg {
    pub centerline_errors: Vec<f64>,
    pub width_errors: Vec<f64>,
    pub segment: usize,
}

impl ErrorMsg {
    /// True if errors were computed for this segment.
    pub fn has_errors(&self) -> bool {
        !self.centerline_errors.is_empty() && !self.width_errors.is_empty()
    }
}

/// Correction → print stream: waypoints ready to be streamed.
#[derive(Debug, Clone, PartialEq)]
pub struct PathMsg {
    pub waypoints: Vec<Waypoint>,
    pub segment: usize,
}
