//! Boundary marking along one profile line.
//!
//! The profile is walked pixel by pixel over the known-path mask. Every run
//! of mask pixels along the walk is a search window; inside a window the
//! steepest rise marks the left material edge and the steepest drop marks the
//! right one.

use image::{GrayImage, Luma};
use imageproc::drawing::BresenhamLineIter;
use tracing::trace;

use super::localize::ProfileLine;
use super::ScanConfig;

/// Pixel walk of the profile line with the resampled height at each step.
#[derive(Debug, Clone, Default)]
pub(crate) struct LineWalk {
    pub pixels: Vec<(i32, i32)>,
    pub heights: Vec<f64>,
    pub in_mask: Vec<bool>,
}

impl LineWalk {
    pub fn new(line: &ProfileLine, profile: &[f64], mask: &GrayImage) -> Self {
        let start = (line.start_px[0] as f32, line.start_px[1] as f32);
        let end = (line.end_px[0] as f32, line.end_px[1] as f32);
        let pixels: Vec<(i32, i32)> = BresenhamLineIter::new(start, end).collect();
        let steps = pixels.len();
        let heights = (0..steps)
            .map(|k| {
                profile
                    .get(line.profile_index(k, steps))
                    .copied()
                    .unwrap_or(0.0)
            })
            .collect();
        let (w, h) = mask.dimensions();
        let in_mask = pixels
            .iter()
            .map(|&(c, r)| {
                c >= 0
                    && r >= 0
                    && (c as u32) < w
                    && (r as u32) < h
                    && mask.get_pixel(c as u32, r as u32)[0] != 0
            })
            .collect();
        Self {
            pixels,
            heights,
            in_mask,
        }
    }

    /// Inclusive `[start, end]` step ranges of consecutive mask pixels.
    ///
    /// A window that is still open where the walk starts or ends is closed at
    /// the walk boundary.
    pub fn windows(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        let mut open: Option<usize> = None;
        for (k, &inside) in self.in_mask.iter().enumerate() {
            match (inside, open) {
                (true, None) => open = Some(k),
                (false, Some(s)) => {
                    out.push((s, k - 1));
                    open = None;
                }
                _ => {}
            }
        }
        if let Some(s) = open {
            out.push((s, self.in_mask.len() - 1));
        }
        out
    }
}

/// Steps inside `[start, end]` that sit on a material edge.
///
/// Returns the rising-edge step (first material sample after the rise) and
/// the falling-edge step (last material sample before the drop), each only
/// when the height change reaches `min_edge_step_mm` and the material side is
/// above `height_threshold_mm`.
pub(crate) fn window_edges(
    heights: &[f64],
    start: usize,
    end: usize,
    config: &ScanConfig,
) -> (Option<usize>, Option<usize>) {
    if end <= start || end >= heights.len() {
        return (None, None);
    }
    let mut rise = (f64::NEG_INFINITY, start);
    let mut fall = (f64::INFINITY, start);
    for k in start..end {
        let d = heights[k + 1] - heights[k];
        if d > rise.0 {
            rise = (d, k);
        }
        if d < fall.0 {
            fall = (d, k);
        }
    }
    let rising = (rise.0 >= config.min_edge_step_mm
        && heights[rise.1 + 1] > config.height_threshold_mm)
        .then_some(rise.1 + 1);
    let falling = (-fall.0 >= config.min_edge_step_mm
        && heights[fall.1] > config.height_threshold_mm)
        .then_some(fall.1);
    (rising, falling)
}

/// Mark boundary pixels of one profile into `boundary`.
///
/// Returns the number of pixels set.
pub fn mark_boundary(
    line: &ProfileLine,
    profile: &[f64],
    mask: &GrayImage,
    config: &ScanConfig,
    boundary: &mut GrayImage,
) -> usize {
    let walk = LineWalk::new(line, profile, mask);
    let (w, h) = boundary.dimensions();
    let mut marked = 0usize;
    for (start, end) in walk.windows() {
        let (rising, falling) = window_edges(&walk.heights, start, end, config);
        for k in rising.into_iter().chain(falling) {
            let (c, r) = walk.pixels[k];
            if c < 0 || r < 0 || c as u32 >= w || r as u32 >= h {
                continue;
            }
            boundary.put_pixel(c as u32, r as u32, Luma([255]));
            marked += 1;
        }
        trace!(start, end, ?rising, ?falling, "scan window");
    }
    marked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ScanConfig {
        ScanConfig {
            height_threshold_mm: 0.05,
            min_edge_step_mm: 0.05,
            ..ScanConfig::default()
        }
    }

    fn vertical_line(col: f64, rows: u32, n: usize) -> ProfileLine {
        ProfileLine {
            start_px: [col, 0.0],
            end_px: [col, (rows - 1) as f64],
            first: 0,
            last: n - 1,
        }
    }

    /// Mask band rows [10, 30) across a 40x40 image.
    fn band_mask() -> GrayImage {
        GrayImage::from_fn(40, 40, |_, r| {
            if (10..30).contains(&r) {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn marks_both_edges_of_a_bead() {
        // bead occupies rows 15..=24
        let profile: Vec<f64> = (0..40)
            .map(|r| if (15..25).contains(&r) { 0.4 } else { 0.0 })
            .collect();
        let line = vertical_line(7.0, 40, profile.len());
        let mut boundary = GrayImage::new(40, 40);
        let n = mark_boundary(&line, &profile, &band_mask(), &config(), &mut boundary);
        assert_eq!(n, 2);
        assert_eq!(boundary.get_pixel(7, 15)[0], 255);
        assert_eq!(boundary.get_pixel(7, 24)[0], 255);
    }

    #[test]
    fn ignores_edges_outside_mask() {
        // bead at rows 2..=6, fully outside the mask band
        let profile: Vec<f64> = (0..40)
            .map(|r| if (2..7).contains(&r) { 0.4 } else { 0.0 })
            .collect();
        let line = vertical_line(7.0, 40, profile.len());
        let mut boundary = GrayImage::new(40, 40);
        let n = mark_boundary(&line, &profile, &band_mask(), &config(), &mut boundary);
        assert_eq!(n, 0);
    }

    #[test]
    fn flat_profile_marks_nothing() {
        let profile = vec![0.4; 40];
        let line = vertical_line(3.0, 40, profile.len());
        let mut boundary = GrayImage::new(40, 40);
        assert_eq!(
            mark_boundary(&line, &profile, &band_mask(), &config(), &mut boundary),
            0
        );
    }

    #[test]
    fn window_open_at_line_start_is_closed_at_boundary() {
        let walk = LineWalk {
            pixels: (0..8).map(|k| (k, 0)).collect(),
            heights: vec![0.0; 8],
            in_mask: vec![true, true, true, false, false, true, true, true],
        };
        assert_eq!(walk.windows(), vec![(0, 2), (5, 7)]);
    }

    #[test]
    fn small_steps_are_rejected() {
        let heights = [0.0, 0.01, 0.02, 0.01, 0.0];
        assert_eq!(window_edges(&heights, 0, 4, &config()), (None, None));
    }
}
