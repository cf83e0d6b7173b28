//! Error-extraction stage: boundary bitmap → two boundary curves →
//! per-waypoint width and centerline errors.
//!
//! For each scanned segment the region of interest is split across the
//! travel axis. Each half yields one boundary curve through a two-pass trace
//! (coarse smoothing, inlier band, fine smoothing). Errors are sampled from
//! the Euclidean distance fields of both curves at every waypoint.

mod curve;
mod errors;

pub use errors::waypoint_error;

use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use curve::{trace_side, TraceParams};
use errors::segment_errors;

use crate::channel::{Consumer, Producer};
use crate::error::Result;
use crate::message::{ErrorMsg, ScanMsg};
use crate::plan::{Measurement, Raster, Segment, SegmentStore};

/// Curve smoothing and outlier rejection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Gaussian window (samples, odd) of the coarse pass.
    pub coarse_window: usize,
    pub coarse_sigma: f64,
    /// Gaussian window (samples, odd) of the fine pass.
    pub fine_window: usize,
    pub fine_sigma: f64,
    /// Width (mm) of the inlier band kept around the coarse curve.
    pub inlier_band_mm: f64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            coarse_window: 7,
            coarse_sigma: 2.0,
            fine_window: 3,
            fine_sigma: 1.0,
            inlier_band_mm: 0.25,
        }
    }
}

impl ExtractConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (name, w) in [
            ("coarse_window", self.coarse_window),
            ("fine_window", self.fine_window),
        ] {
            if w == 0 || w % 2 == 0 {
                return Err(format!("extract.{name} must be odd and > 0 (got {w})"));
            }
        }
        for (name, s) in [
            ("coarse_sigma", self.coarse_sigma),
            ("fine_sigma", self.fine_sigma),
            ("inlier_band_mm", self.inlier_band_mm),
        ] {
            if !s.is_finite() || s <= 0.0 {
                return Err(format!("extract.{name} must be finite and > 0"));
            }
        }
        Ok(())
    }

    fn trace_params(&self, raster: &Raster) -> TraceParams {
        let band_px = raster.mm_to_px_len(self.inlier_band_mm);
        TraceParams {
            coarse_window: self.coarse_window,
            coarse_sigma: self.coarse_sigma,
            fine_window: self.fine_window,
            fine_sigma: self.fine_sigma,
            inlier_radius: (band_px / 2.0).round().clamp(1.0, u8::MAX as f64) as u8,
        }
    }
}

/// Measure one segment against a boundary bitmap.
///
/// Segments without a region of interest, or with a boundary on only one
/// side, get empty error arrays. Curves found on either side are kept.
pub fn measure_segment(
    boundary: &GrayImage,
    segment: &Segment,
    raster: &Raster,
    config: &ExtractConfig,
) -> Measurement {
    let Some(roi) = segment.roi else {
        return Measurement::default();
    };
    let (w, h) = boundary.dimensions();
    let roi = roi.clamp_to(w, h);
    let travel_x = segment.direction.is_x();
    let (left_half, right_half) = roi.split_across(travel_x);
    let params = config.trace_params(raster);

    let left = trace_side(boundary, left_half, travel_x, &params);
    let right = trace_side(boundary, right_half, travel_x, &params);
    if left.is_empty() || right.is_empty() {
        return Measurement {
            left,
            right,
            ..Measurement::default()
        };
    }
    let (centerline_errors, width_errors) =
        segment_errors(&left, &right, &segment.waypoints, raster, travel_x);
    Measurement {
        left,
        right,
        centerline_errors,
        width_errors,
    }
}

/// Run the error-extraction stage until the `last` scan message.
///
/// Messages for an already measured segment are dropped with a warning, so
/// each segment yields at most one error message.
pub fn run_extract_stage(
    raster: &Raster,
    segments: &SegmentStore,
    config: &ExtractConfig,
    input: &Consumer<ScanMsg>,
    out: &Producer<ErrorMsg>,
) -> Result<usize> {
    let mut measured = 0usize;
    loop {
        let msg = input.wait_and_pop()?;
        let segment = segments.get(msg.segment)?;
        if segment.measurement().is_some() {
            warn!("segment {} already measured, ignoring scan", msg.segment);
        } else {
            let m = measure_segment(&msg.boundary, segment, raster, config);
            if m.has_errors() {
                let valid = m.width_errors.iter().filter(|v| v.is_finite()).count();
                debug!(
                    segment = msg.segment,
                    valid,
                    waypoints = segment.waypoints.len(),
                    "errors computed"
                );
                measured += 1;
            } else if segment.roi.is_some() {
                warn!("segment {}: boundary missing on one side", msg.segment);
            }
            let error_msg = ErrorMsg {
                centerline_errors: m.centerline_errors.clone(),
                width_errors: m.width_errors.clone(),
                segment: msg.segment,
            };
            segments.record_measurement(msg.segment, m)?;
            out.push(error_msg)?;
            info!("segment {} processed", msg.segment);
        }
        if msg.last {
            break;
        }
    }
    Ok(measured)
}
