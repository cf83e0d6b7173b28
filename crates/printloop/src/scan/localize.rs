//! Place a scanner profile in the raster frame.
//!
//! The scan line sits `scan_offset_mm` behind the nozzle along the rotary
//! axis heading and spans `scan_width_mm` perpendicular to it. Profile sample
//! `i` of `n` lies at local offset `-W/2 + i·W/(n-1)` along the line.

use nalgebra::{Point2, Rotation2, Vector2};

use super::ScanConfig;
use crate::machine::Pose;
use crate::plan::Raster;

/// The part of a profile that falls inside the raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileLine {
    /// Fractional pixel position of profile sample `first`.
    pub start_px: [f64; 2],
    /// Fractional pixel position of profile sample `last`.
    pub end_px: [f64; 2],
    /// First profile index inside the raster.
    pub first: usize,
    /// Last profile index inside the raster.
    pub last: usize,
}

impl ProfileLine {
    /// Profile index matching step `k` of a `steps`-long pixel walk from
    /// `start_px` to `end_px`.
    pub fn profile_index(&self, k: usize, steps: usize) -> usize {
        if steps < 2 || self.last == self.first {
            return self.first;
        }
        let t = k.min(steps - 1) as f64 / (steps - 1) as f64;
        self.first + (t * (self.last - self.first) as f64).round() as usize
    }
}

/// Machine position (mm) of profile sample `i` out of `n`.
pub fn sample_position(pose: &Pose, i: usize, n: usize, config: &ScanConfig) -> [f64; 2] {
    let w = config.scan_width_mm;
    let local = if n > 1 {
        -w / 2.0 + i as f64 * w / (n - 1) as f64
    } else {
        0.0
    };
    let rot = Rotation2::new(pose.theta.to_radians());
    let p = Point2::new(pose.x, pose.y) + rot * Vector2::new(-config.scan_offset_mm, local);
    [p.x, p.y]
}

/// Locate the profile in the raster.
///
/// Returns `None` when fewer than two samples land inside the print region.
pub fn localize_profile(
    pose: &Pose,
    n_samples: usize,
    raster: &Raster,
    config: &ScanConfig,
) -> Option<ProfileLine> {
    let mut first: Option<(usize, [f64; 2])> = None;
    let mut last: Option<(usize, [f64; 2])> = None;
    for i in 0..n_samples {
        let xy = sample_position(pose, i, n_samples, config);
        if !raster.contains_mm(xy) {
            continue;
        }
        if first.is_none() {
            first = Some((i, xy));
        } else {
            last = Some((i, xy));
        }
    }
    let (first, start) = first?;
    let (last, end) = last?;
    Some(ProfileLine {
        start_px: raster.mm_to_px(start),
        end_px: raster.mm_to_px(end),
        first,
        last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raster() -> Raster {
        Raster {
            origin: [0.0, 0.0],
            mm_per_px: 0.1,
            width_px: 300,
            height_px: 200,
            mask_width_mm: 3.0,
        }
    }

    fn config() -> ScanConfig {
        ScanConfig {
            scan_offset_mm: 5.0,
            scan_width_mm: 10.0,
            ..ScanConfig::default()
        }
    }

    #[test]
    fn scanner_trails_nozzle_for_positive_x() {
        let pose = Pose {
            x: 20.0,
            y: 10.0,
            z: 0.0,
            theta: 0.0,
        };
        let c = config();
        let left = sample_position(&pose, 0, 101, &c);
        let mid = sample_position(&pose, 50, 101, &c);
        let right = sample_position(&pose, 100, 101, &c);
        assert!((mid[0] - 15.0).abs() < 1e-9 && (mid[1] - 10.0).abs() < 1e-9);
        assert!((left[1] - 5.0).abs() < 1e-9);
        assert!((right[1] - 15.0).abs() < 1e-9);
    }

    #[test]
    fn scanner_trails_nozzle_for_negative_x() {
        let pose = Pose {
            x: 20.0,
            y: 10.0,
            z: 0.0,
            theta: 180.0,
        };
        let mid = sample_position(&pose, 50, 101, &config());
        assert!((mid[0] - 25.0).abs() < 1e-9);
        assert!((mid[1] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn line_is_clipped_to_raster() {
        let pose = Pose {
            x: 20.0,
            y: 2.0,
            z: 0.0,
            theta: 0.0,
        };
        let line = localize_profile(&pose, 101, &raster(), &config()).unwrap();
        // samples with y < 0 fall outside (y = -3 .. 7 across the profile)
        assert_eq!(line.first, 30);
        assert_eq!(line.last, 100);
        assert!((line.start_px[1] - 0.0).abs() < 1e-6);
        assert!((line.end_px[1] - 70.0).abs() < 1e-6);
    }

    #[test]
    fn line_outside_raster_is_none() {
        let pose = Pose {
            x: 100.0,
            y: 100.0,
            z: 0.0,
            theta: 0.0,
        };
        assert!(localize_profile(&pose, 50, &raster(), &config()).is_none());
    }

    #[test]
    fn profile_index_spans_range() {
        let line = ProfileLine {
            start_px: [0.0, 0.0],
            end_px: [0.0, 10.0],
            first: 4,
            last: 24,
        };
        assert_eq!(line.profile_index(0, 11), 4);
        assert_eq!(line.profile_index(5, 11), 14);
        assert_eq!(line.profile_index(10, 11), 24);
    }
}
