use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::plan::{Raster, SegmentStore, Waypoint};
use crate::stream::StreamSummary;

/// Serializable summary of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Number of segments in the plan.
    pub segments: usize,
    /// Segments whose errors were computed.
    pub measured_segments: usize,
    /// Scanner acquisitions.
    pub scan_cycles: usize,
    /// Boundary pixels marked (counting repeats).
    pub boundary_pixels: usize,
    /// Segments released without reaching their scan-complete point.
    pub flushed_segments: usize,
    /// Print-stream counters, including the load order.
    pub stream: StreamSummary,
}

/// Everything a run leaves behind.
#[derive(Debug)]
pub struct RunOutput {
    pub report: RunReport,
    pub raster: Raster,
    /// Known-path mask the scan windows were taken from.
    pub mask: GrayImage,
    /// Accumulated boundary bitmap.
    pub boundary: GrayImage,
    /// Segments with their measurements.
    pub segments: SegmentStore,
    /// Waypoints as streamed, after correction.
    pub streamed_paths: Vec<Vec<Waypoint>>,
}
