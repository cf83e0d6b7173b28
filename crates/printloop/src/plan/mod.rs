//! Print plan: the one-shot hand-off from path generation.
//!
//! A [`PrintPlan`] bundles the raster frame with the ordered segment list. It
//! is built (or loaded from JSON) before the pipeline starts and is immutable
//! afterwards, except that the correction stage rewrites feed/extrusion on
//! its own copy of the waypoints.

mod raster;
mod segment;
mod waypoint;

use std::path::Path;

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

pub(crate) use raster::for_each_pixel_in_capsule;
pub use raster::{PixelRect, Raster};
pub use segment::{Measurement, Segment, SegmentStore};
pub use waypoint::{PrintDir, Waypoint};

use crate::error::{PipelineError, Result};

/// Schema tag written into plan JSON files.
pub const PLAN_SCHEMA_V1: &str = "printloop.plan.v1";

/// Raster geometry plus the ordered segment sequence of one print.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintPlan {
    pub schema: String,
    pub raster: Raster,
    pub segments: Vec<Segment>,
}

impl PrintPlan {
    /// Build and validate a plan.
    pub fn new(raster: Raster, segments: Vec<Segment>) -> Result<Self> {
        let plan = Self {
            schema: PLAN_SCHEMA_V1.to_string(),
            raster,
            segments,
        };
        plan.validate().map_err(PipelineError::invalid_plan)?;
        Ok(plan)
    }

    /// Load a plan from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let plan: PrintPlan = serde_json::from_str(&data)?;
        if plan.schema != PLAN_SCHEMA_V1 {
            return Err(PipelineError::invalid_plan(format!(
                "unsupported plan schema '{}' (expected '{}')",
                plan.schema, PLAN_SCHEMA_V1
            )));
        }
        plan.validate().map_err(PipelineError::invalid_plan)?;
        Ok(plan)
    }

    /// Write the plan as pretty JSON.
    pub fn write_json_file(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Total number of waypoints.
    pub fn waypoint_count(&self) -> usize {
        self.segments.iter().map(|s| s.waypoints.len()).sum()
    }

    /// Push the final segment's scan-complete point `length` mm further
    /// along its travel direction, so the scanner can cover the last rod
    /// during the lead-out move.
    pub fn extend_leadout(&mut self, length: f64) {
        if let Some(last) = self.segments.last_mut() {
            let u = last.direction.unit();
            last.scan_done_pt[0] += u[0] * length;
            last.scan_done_pt[1] += u[1] * length;
        }
    }

    /// Known-path mask: rods that carry a region of interest drawn
    /// `raster.mask_width_mm` wide. Scan windows open where a profile line
    /// crosses into this mask.
    pub fn path_mask(&self) -> GrayImage {
        let raster = &self.raster;
        let (w, h) = raster.dimensions();
        let mut mask = raster.blank();
        let radius = raster.mm_to_px_len(raster.mask_width_mm) / 2.0;
        for seg in self.segments.iter().filter(|s| s.roi.is_some()) {
            for pair in seg.waypoints.windows(2) {
                let a = raster.mm_to_px(pair[0].xy());
                let b = raster.mm_to_px(pair[1].xy());
                for_each_pixel_in_capsule(w, h, a, b, radius, |c, r| {
                    mask.put_pixel(c, r, Luma([255]));
                });
            }
        }
        mask
    }

    /// Move the segments into a shared store.
    pub fn into_parts(self) -> (Raster, SegmentStore) {
        (self.raster, SegmentStore::new(self.segments))
    }

    fn validate(&self) -> std::result::Result<(), String> {
        validate_raster(&self.raster)?;
        if self.segments.is_empty() {
            return Err("plan has no segments".to_string());
        }
        for (i, seg) in self.segments.iter().enumerate() {
            if seg.waypoints.is_empty() {
                return Err(format!("segment {i} has no waypoints"));
            }
            if let Some(roi) = seg.roi {
                if roi.is_empty() {
                    return Err(format!("segment {i} has an empty region of interest"));
                }
                if roi.right() > self.raster.width_px || roi.bottom() > self.raster.height_px {
                    return Err(format!("segment {i} region of interest exceeds the raster"));
                }
            }
            let finite = seg.waypoints.iter().all(|w| {
                [w.x, w.y, w.z, w.theta, w.feed, w.extrusion, w.width]
                    .iter()
                    .all(|v| v.is_finite())
            });
            if !finite {
                return Err(format!("segment {i} has non-finite waypoint values"));
            }
        }
        Ok(())
    }
}

fn validate_raster(raster: &Raster) -> std::result::Result<(), String> {
    if !raster.mm_per_px.is_finite() || raster.mm_per_px <= 0.0 {
        return Err("mm_per_px must be finite and > 0".to_string());
    }
    if raster.width_px == 0 || raster.height_px == 0 {
        return Err("raster must be at least 1x1 pixels".to_string());
    }
    if !raster.mask_width_mm.is_finite() || raster.mask_width_mm <= 0.0 {
        return Err("mask_width_mm must be finite and > 0".to_string());
    }
    Ok(())
}
