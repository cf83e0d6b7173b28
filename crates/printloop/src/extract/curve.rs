//! Boundary curve tracing inside one half of a region of interest.

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::drawing::draw_line_segment_mut;
use imageproc::morphology::dilate;

use crate::plan::PixelRect;

/// Pixel centres of non-zero pixels of `image` inside `rect`, optionally
/// restricted to non-zero pixels of `keep`.
pub(crate) fn collect_points(
    image: &GrayImage,
    rect: PixelRect,
    keep: Option<&GrayImage>,
) -> Vec<[f64; 2]> {
    let (w, h) = image.dimensions();
    let rect = rect.clamp_to(w, h);
    let mut out = Vec::new();
    for row in rect.y..rect.bottom() {
        for col in rect.x..rect.right() {
            if image.get_pixel(col, row)[0] == 0 {
                continue;
            }
            if let Some(k) = keep {
                if k.get_pixel(col, row)[0] == 0 {
                    continue;
                }
            }
            out.push([col as f64, row as f64]);
        }
    }
    out
}

/// Order points along the travel axis.
///
/// X travel: sort by x, ties by y. Y travel: greedy nearest-neighbour chain
/// starting from the point with the smallest y.
pub(crate) fn order_points(mut points: Vec<[f64; 2]>, travel_x: bool) -> Vec<[f64; 2]> {
    if travel_x {
        points.sort_by(|a, b| a[0].total_cmp(&b[0]).then(a[1].total_cmp(&b[1])));
        return points;
    }
    nearest_neighbor_chain(points)
}

fn nearest_neighbor_chain(mut points: Vec<[f64; 2]>) -> Vec<[f64; 2]> {
    let Some(start) = points
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a[1].total_cmp(&b[1]).then(a[0].total_cmp(&b[0])))
        .map(|(i, _)| i)
    else {
        return points;
    };
    let mut chain = Vec::with_capacity(points.len());
    let mut cur = points.swap_remove(start);
    chain.push(cur);
    while !points.is_empty() {
        let mut best = 0usize;
        let mut best_d2 = f64::INFINITY;
        for (i, p) in points.iter().enumerate() {
            let d2 = (p[0] - cur[0]).powi(2) + (p[1] - cur[1]).powi(2);
            if d2 < best_d2 {
                best_d2 = d2;
                best = i;
            }
        }
        cur = points.swap_remove(best);
        chain.push(cur);
    }
    chain
}

/// Normalised Gaussian kernel of odd length `window`.
pub(crate) fn gaussian_kernel(window: usize, sigma: f64) -> Vec<f64> {
    let half = (window / 2) as i64;
    let two_s2 = 2.0 * sigma * sigma;
    let mut k: Vec<f64> = (-half..=half)
        .map(|i| (-((i * i) as f64) / two_s2).exp())
        .collect();
    let sum: f64 = k.iter().sum();
    for v in &mut k {
        *v /= sum;
    }
    k
}

/// Smooth the cross-axis coordinate of an ordered curve.
///
/// The kernel is truncated and renormalised near the curve ends, so the
/// output has the same length and the travel-axis coordinates are kept.
pub(crate) fn smooth_curve(
    points: &[[f64; 2]],
    travel_x: bool,
    window: usize,
    sigma: f64,
) -> Vec<[f64; 2]> {
    let cross = usize::from(travel_x);
    let kernel = gaussian_kernel(window, sigma);
    let half = (kernel.len() / 2) as isize;
    let n = points.len() as isize;
    (0..n)
        .map(|i| {
            let mut acc = 0.0;
            let mut wsum = 0.0;
            for (j, kw) in kernel.iter().enumerate() {
                let idx = i + j as isize - half;
                if idx < 0 || idx >= n {
                    continue;
                }
                acc += kw * points[idx as usize][cross];
                wsum += kw;
            }
            let mut p = points[i as usize];
            p[cross] = acc / wsum;
            p
        })
        .collect()
}

/// Draw an ordered curve as a connected one-pixel polyline.
pub(crate) fn rasterize_curve(curve: &[[f64; 2]], width: u32, height: u32) -> GrayImage {
    let mut img = GrayImage::new(width, height);
    match curve {
        [] => {}
        [p] => {
            let (c, r) = (p[0].round(), p[1].round());
            if c >= 0.0 && r >= 0.0 && (c as u32) < width && (r as u32) < height {
                img.put_pixel(c as u32, r as u32, Luma([255]));
            }
        }
        _ => {
            for pair in curve.windows(2) {
                draw_line_segment_mut(
                    &mut img,
                    (pair[0][0] as f32, pair[0][1] as f32),
                    (pair[1][0] as f32, pair[1][1] as f32),
                    Luma([255]),
                );
            }
        }
    }
    img
}

/// Smoothing parameters of a two-pass trace.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TraceParams {
    pub coarse_window: usize,
    pub coarse_sigma: f64,
    pub fine_window: usize,
    pub fine_sigma: f64,
    /// Chebyshev radius (px) of the inlier band around the coarse curve.
    pub inlier_radius: u8,
}

/// Trace one boundary side inside `half`.
///
/// A coarse smoothed curve defines an inlier band; points outside the band
/// are dropped and the survivors are smoothed again. Returns an empty curve
/// when the half holds no boundary pixels.
pub(crate) fn trace_side(
    boundary: &GrayImage,
    half: PixelRect,
    travel_x: bool,
    params: &TraceParams,
) -> Vec<[f64; 2]> {
    let raw = order_points(collect_points(boundary, half, None), travel_x);
    if raw.is_empty() {
        return raw;
    }
    let coarse = smooth_curve(&raw, travel_x, params.coarse_window, params.coarse_sigma);
    let (w, h) = boundary.dimensions();
    let band = dilate(
        &rasterize_curve(&coarse, w, h),
        Norm::LInf,
        params.inlier_radius,
    );
    let inliers = order_points(collect_points(boundary, half, Some(&band)), travel_x);
    if inliers.is_empty() {
        return coarse;
    }
    smooth_curve(&inliers, travel_x, params.fine_window, params.fine_sigma)
}
