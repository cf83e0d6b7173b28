//! Serpentine demo plan: parallel X rods joined by short Y connectors.

use serde::{Deserialize, Serialize};

use crate::correct::MaterialModel;
use crate::error::Result;
use crate::plan::{PixelRect, PrintDir, PrintPlan, Raster, Segment, Waypoint};

/// Geometry of a single-layer serpentine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerpentineSpec {
    pub rods: usize,
    pub rod_length_mm: f64,
    /// Centre-to-centre rod spacing.
    pub spacing_mm: f64,
    /// Waypoint spacing along rods and connectors.
    pub step_mm: f64,
    /// Target bead width.
    pub width_mm: f64,
    pub feed: f64,
    pub z: f64,
    /// Free border around the print.
    pub margin_mm: f64,
    pub mm_per_px: f64,
}

impl Default for SerpentineSpec {
    fn default() -> Self {
        Self {
            rods: 8,
            rod_length_mm: 20.0,
            spacing_mm: 4.0,
            step_mm: 0.5,
            width_mm: 1.5,
            feed: 2.0,
            z: 0.4,
            margin_mm: 8.0,
            mm_per_px: 0.1,
        }
    }
}

fn line(from: [f64; 2], dir: PrintDir, length: f64, step: f64, skip_first: bool) -> Vec<[f64; 2]> {
    let n = (length / step).round().max(1.0) as usize;
    let u = dir.unit();
    let first = usize::from(skip_first);
    (first..=n)
        .map(|k| {
            let d = length * k as f64 / n as f64;
            [from[0] + u[0] * d, from[1] + u[1] * d]
        })
        .collect()
}

/// Build the serpentine plan.
///
/// Rods are measured (they carry a region of interest); connectors are not.
/// A rod counts as scanned once the machine reaches the end of the next rod,
/// a connector once it reaches the end of the rod that follows it. Extrusion
/// is assigned from `model` for the target width.
pub fn serpentine_plan(spec: &SerpentineSpec, model: &MaterialModel) -> Result<PrintPlan> {
    let raster = Raster {
        origin: [0.0, 0.0],
        mm_per_px: spec.mm_per_px,
        width_px: ((spec.rod_length_mm + 2.0 * spec.margin_mm) / spec.mm_per_px).ceil() as u32,
        height_px: ((spec.rods.saturating_sub(1) as f64 * spec.spacing_mm + 2.0 * spec.margin_mm)
            / spec.mm_per_px)
            .ceil() as u32,
        mask_width_mm: 0.8 * spec.spacing_mm,
    };
    let x0 = spec.margin_mm;
    let x1 = spec.margin_mm + spec.rod_length_mm;
    let inset = raster.mask_width_mm / 2.0;

    let waypoint = |p: [f64; 2], dir: PrintDir| Waypoint {
        theta: dir.theta_deg(),
        feed: spec.feed,
        width: spec.width_mm,
        ..Waypoint::at(p[0], p[1], spec.z)
    };

    let mut segments: Vec<(Vec<Waypoint>, Option<PixelRect>, PrintDir)> = Vec::new();
    for i in 0..spec.rods {
        let y = spec.margin_mm + i as f64 * spec.spacing_mm;
        let (start, dir) = if i % 2 == 0 {
            ([x0, y], PrintDir::XPos)
        } else {
            ([x1, y], PrintDir::XNeg)
        };
        if i > 0 {
            let from = [start[0], y - spec.spacing_mm];
            let pts = line(from, PrintDir::YPos, spec.spacing_mm, spec.step_mm, true);
            segments.push((
                pts.into_iter().map(|p| waypoint(p, PrintDir::YPos)).collect(),
                None,
                PrintDir::YPos,
            ));
        }
        let pts = line(start, dir, spec.rod_length_mm, spec.step_mm, i > 0);
        let lo = raster.mm_to_px([x0 + inset, y - spec.spacing_mm / 2.0]);
        let hi = raster.mm_to_px([x1 - inset, y + spec.spacing_mm / 2.0]);
        let roi = PixelRect::new(
            lo[0].round() as u32,
            lo[1].round() as u32,
            (hi[0] - lo[0]).round() as u32,
            (hi[1] - lo[1]).round() as u32,
        );
        segments.push((
            pts.into_iter().map(|p| waypoint(p, dir)).collect(),
            Some(roi),
            dir,
        ));
    }

    let n = segments.len();
    let ends: Vec<[f64; 2]> = segments
        .iter()
        .map(|(w, _, _)| w.last().map_or([0.0, 0.0], Waypoint::xy))
        .collect();
    let segments = segments
        .into_iter()
        .enumerate()
        .map(|(idx, (mut waypoints, roi, dir))| {
            let done = if roi.is_some() { idx + 2 } else { idx + 1 };
            model.apply(&mut waypoints);
            Segment::new(waypoints, roi, dir, 0, ends[done.min(n - 1)])
        })
        .collect();
    PrintPlan::new(raster, segments)
}
