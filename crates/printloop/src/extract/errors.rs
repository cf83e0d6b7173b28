//! Per-waypoint width and centerline errors from two boundary curves.

use image::{ImageBuffer, Luma};
use imageproc::distance_transform::euclidean_squared_distance_transform;

use super::curve::rasterize_curve;
use crate::plan::{Raster, Waypoint};

/// Euclidean distance (px) from every pixel to the nearest curve pixel.
pub(crate) type DistanceField = ImageBuffer<Luma<f64>, Vec<f64>>;

pub(crate) fn distance_field(curve: &[[f64; 2]], width: u32, height: u32) -> DistanceField {
    let mut field = euclidean_squared_distance_transform(&rasterize_curve(curve, width, height));
    for p in field.pixels_mut() {
        p[0] = p[0].sqrt();
    }
    field
}

/// Rectangle jointly bounded by two curves (pixel units, inclusive).
///
/// Along the travel axis it is the overlap of both curves; across it, the
/// span of both.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct JointBounds {
    travel_x: bool,
    along: [f64; 2],
    cross: [f64; 2],
}

impl JointBounds {
    pub fn new(left: &[[f64; 2]], right: &[[f64; 2]], travel_x: bool) -> Option<Self> {
        let (a, c) = if travel_x { (0, 1) } else { (1, 0) };
        let span = |curve: &[[f64; 2]], axis: usize| -> Option<[f64; 2]> {
            curve.iter().fold(None, |acc: Option<[f64; 2]>, p| {
                Some(match acc {
                    None => [p[axis], p[axis]],
                    Some(r) => [r[0].min(p[axis]), r[1].max(p[axis])],
                })
            })
        };
        let (la, ra) = (span(left, a)?, span(right, a)?);
        let (lc, rc) = (span(left, c)?, span(right, c)?);
        Some(Self {
            travel_x,
            along: [la[0].max(ra[0]), la[1].min(ra[1])],
            cross: [lc[0].min(rc[0]), lc[1].max(rc[1])],
        })
    }

    pub fn contains(&self, px: [f64; 2]) -> bool {
        let (a, c) = if self.travel_x {
            (px[0], px[1])
        } else {
            (px[1], px[0])
        };
        a >= self.along[0] && a <= self.along[1] && c >= self.cross[0] && c <= self.cross[1]
    }
}

/// Centerline and width error of one waypoint.
///
/// `d_left` / `d_right` are distances (mm) from the waypoint to the left and
/// right boundary. A positive centerline error means the bead sits toward the
/// left side; a positive width error means the bead is narrower than
/// `target_width`.
#[inline]
pub fn waypoint_error(d_left: f64, d_right: f64, target_width: f64) -> (f64, f64) {
    ((d_right - d_left) / 2.0, target_width - (d_left + d_right))
}

/// Errors for every waypoint of a segment. NaN where the waypoint lies
/// outside the joint bounds of the two curves or outside the raster.
pub(crate) fn segment_errors(
    left: &[[f64; 2]],
    right: &[[f64; 2]],
    waypoints: &[Waypoint],
    raster: &Raster,
    travel_x: bool,
) -> (Vec<f64>, Vec<f64>) {
    let n = waypoints.len();
    let Some(bounds) = JointBounds::new(left, right, travel_x) else {
        return (vec![f64::NAN; n], vec![f64::NAN; n]);
    };
    let (w, h) = raster.dimensions();
    let dl = distance_field(left, w, h);
    let dr = distance_field(right, w, h);

    let mut centerline = Vec::with_capacity(n);
    let mut width = Vec::with_capacity(n);
    for wp in waypoints {
        let px = raster.mm_to_px(wp.xy());
        match raster.pixel_at(wp.xy()) {
            Some((c, r)) if bounds.contains(px) => {
                let d_left = raster.px_to_mm_len(dl.get_pixel(c, r)[0]);
                let d_right = raster.px_to_mm_len(dr.get_pixel(c, r)[0]);
                let (cl, wd) = waypoint_error(d_left, d_right, wp.width);
                centerline.push(cl);
                width.push(wd);
            }
            _ => {
                centerline.push(f64::NAN);
                width.push(f64::NAN);
            }
        }
    }
    (centerline, width)
}
