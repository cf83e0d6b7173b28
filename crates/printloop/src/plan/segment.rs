//! Segments and the process-wide segment store.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use super::raster::PixelRect;
use super::waypoint::{PrintDir, Waypoint};
use crate::error::{PipelineError, Result};

/// Measured geometry of one segment, written once by error extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Smoothed left boundary curve (pixel coordinates).
    pub left: Vec<[f64; 2]>,
    /// Smoothed right boundary curve (pixel coordinates).
    pub right: Vec<[f64; 2]>,
    /// Per-waypoint centerline error (mm), NaN where undefined.
    pub centerline_errors: Vec<f64>,
    /// Per-waypoint width error (mm), NaN where undefined.
    pub width_errors: Vec<f64>,
}

impl Measurement {
    /// True when no per-waypoint errors were computed.
    pub fn has_errors(&self) -> bool {
        !self.centerline_errors.is_empty() && !self.width_errors.is_empty()
    }
}

/// One printed rod or pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    /// Nominal waypoints produced by path generation.
    pub waypoints: Vec<Waypoint>,
    /// Region of interest in raster pixels. `None` for moves that are never
    /// measured (e.g. short connectors between rods).
    #[serde(default)]
    pub roi: Option<PixelRect>,
    pub direction: PrintDir,
    pub layer: usize,
    /// Machine position (mm) at which this segment counts as fully scanned.
    pub scan_done_pt: [f64; 2],
    #[serde(skip)]
    measurement: OnceLock<Measurement>,
}

impl Segment {
    pub fn new(
        waypoints: Vec<Waypoint>,
        roi: Option<PixelRect>,
        direction: PrintDir,
        layer: usize,
        scan_done_pt: [f64; 2],
    ) -> Self {
        Self {
            waypoints,
            roi,
            direction,
            layer,
            scan_done_pt,
            measurement: OnceLock::new(),
        }
    }

    /// Measurement, once error extraction has processed this segment.
    pub fn measurement(&self) -> Option<&Measurement> {
        self.measurement.get()
    }
}

/// Arena of all segments of a run, indexed by segment number.
///
/// The store is shared by reference between stage threads. The only write
/// after construction is the one-shot measurement slot of each segment, which
/// error extraction fills exactly once; a second write is rejected.
#[derive(Debug, Default)]
pub struct SegmentStore {
    segments: Vec<Segment>,
}

impl SegmentStore {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segment by index.
    pub fn get(&self, index: usize) -> Result<&Segment> {
        self.segments
            .get(index)
            .ok_or(PipelineError::SegmentOutOfRange {
                index,
                count: self.segments.len(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    /// Store the measurement of segment `index`.
    ///
    /// Fails with [`PipelineError::AlreadyMeasured`] if the segment already
    /// has one; the existing record is left untouched.
    pub fn record_measurement(&self, index: usize, measurement: Measurement) -> Result<()> {
        self.get(index)?
            .measurement
            .set(measurement)
            .map_err(|_| PipelineError::AlreadyMeasured { segment: index })
    }

    /// Copy of every segment's nominal waypoints.
    pub fn nominal_paths(&self) -> Vec<Vec<Waypoint>> {
        self.segments.iter().map(|s| s.waypoints.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(n: usize) -> SegmentStore {
        let segments = (0..n)
            .map(|i| {
                Segment::new(
                    vec![Waypoint::at(i as f64, 0.0, 0.0)],
                    None,
                    PrintDir::XPos,
                    0,
                    [i as f64, 1.0],
                )
            })
            .collect();
        SegmentStore::new(segments)
    }

    #[test]
    fn measurement_is_write_once() {
        let s = store(3);
        let first = Measurement {
            width_errors: vec![0.1],
            centerline_errors: vec![0.0],
            ..Default::default()
        };
        s.record_measurement(1, first.clone()).unwrap();
        let err = s
            .record_measurement(1, Measurement::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyMeasured { segment: 1 }));
        assert_eq!(s.get(1).unwrap().measurement(), Some(&first));
        assert!(s.get(0).unwrap().measurement().is_none());
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let s = store(2);
        assert!(matches!(
            s.get(5),
            Err(PipelineError::SegmentOutOfRange { index: 5, count: 2 })
        ));
        assert!(s.record_measurement(2, Measurement::default()).is_err());
    }

    #[test]
    fn empty_measurement_has_no_errors() {
        let m = Measurement {
            width_errors: vec![1.0],
            ..Default::default()
        };
        assert!(!m.has_errors());
    }
}
