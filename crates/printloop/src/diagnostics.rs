//! Persisted output of a finished run.
//!
//! Written files, all inside one output directory:
//!
//! - `edgedata.png`: accumulated boundary bitmap;
//! - `edges.png`: overlay of path mask (blue), boundary (red) and the
//!   smoothed boundary curves of every measured segment (green);
//! - `pathData.tsv`: one row per streamed waypoint of each measured segment;
//! - `widths.tsv`: one row per measured segment with width statistics;
//! - `report.json`: the serialized [`RunReport`](crate::RunReport).

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::pipeline::RunOutput;
use crate::plan::{Measurement, Waypoint};

const MASK_COLOR: Rgb<u8> = Rgb([0, 0, 160]);
const BOUNDARY_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const CURVE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Width statistics of one measured segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WidthSummary {
    pub segment: usize,
    /// Feed of the first streamed waypoint.
    pub feed: f64,
    /// Extrusion set-point of the first streamed waypoint.
    pub extrusion: f64,
    /// Mean measured width (mm).
    pub mean_width: f64,
    /// Sample standard deviation of the width error (mm).
    pub stdev: f64,
    /// Width error L2 norm divided by the measured length.
    pub l2_error: f64,
}

/// Summarize the finite entries of `width_errors` for one segment.
///
/// Returns `None` when fewer than two finite errors are available.
pub fn summarize_widths(
    segment: usize,
    waypoints: &[Waypoint],
    width_errors: &[f64],
) -> Option<WidthSummary> {
    let first = waypoints.first()?;
    let finite: Vec<f64> = width_errors
        .iter()
        .copied()
        .filter(|e| e.is_finite())
        .collect();
    if finite.len() < 2 {
        return None;
    }
    let n = finite.len() as f64;
    let mean_err = finite.iter().sum::<f64>() / n;
    let var = finite.iter().map(|e| (e - mean_err).powi(2)).sum::<f64>() / (n - 1.0);
    let l2 = finite.iter().map(|e| e * e).sum::<f64>().sqrt();
    let length = mean_spacing(waypoints) * (n - 1.0);

    Some(WidthSummary {
        segment,
        feed: first.feed,
        extrusion: first.extrusion,
        mean_width: first.width - mean_err,
        stdev: var.sqrt(),
        l2_error: if length > 0.0 { l2 / length } else { f64::NAN },
    })
}

fn mean_spacing(waypoints: &[Waypoint]) -> f64 {
    if waypoints.len() < 2 {
        return 0.0;
    }
    let total: f64 = waypoints
        .windows(2)
        .map(|w| {
            let (a, b) = (w[0].xy(), w[1].xy());
            (b[0] - a[0]).hypot(b[1] - a[1])
        })
        .sum();
    total / (waypoints.len() - 1) as f64
}

/// Color overlay of mask, boundary pixels and fitted curves.
pub fn boundary_overlay<'a>(
    mask: &GrayImage,
    boundary: &GrayImage,
    measurements: impl IntoIterator<Item = &'a Measurement>,
) -> RgbImage {
    let (w, h) = boundary.dimensions();
    let mut img = RgbImage::new(w, h);
    for (x, y, px) in img.enumerate_pixels_mut() {
        if boundary.get_pixel(x, y)[0] > 0 {
            *px = BOUNDARY_COLOR;
        } else if x < mask.width() && y < mask.height() && mask.get_pixel(x, y)[0] > 0 {
            *px = MASK_COLOR;
        }
    }
    for m in measurements {
        for curve in [&m.left, &m.right] {
            for pair in curve.windows(2) {
                draw_line_segment_mut(
                    &mut img,
                    (pair[0][0] as f32, pair[0][1] as f32),
                    (pair[1][0] as f32, pair[1][1] as f32),
                    CURVE_COLOR,
                );
            }
        }
    }
    img
}

fn fmt_err(v: Option<f64>) -> String {
    match v {
        Some(e) if e.is_finite() => format!("{e:.4}"),
        Some(_) => "NaN".to_string(),
        None => String::new(),
    }
}

fn path_table(out: &RunOutput) -> String {
    let mut s = String::from("segment\tx\ty\tfeed\textrusion\twidth\twidth_err\tcenterline_err\n");
    for (i, seg) in out.segments.iter().enumerate() {
        if seg.roi.is_none() {
            continue;
        }
        let Some(streamed) = out.streamed_paths.get(i) else {
            continue;
        };
        let m = seg.measurement();
        for (j, wp) in streamed.iter().enumerate() {
            let wd = m.and_then(|m| m.width_errors.get(j).copied());
            let cl = m.and_then(|m| m.centerline_errors.get(j).copied());
            // writing into a String cannot fail
            let _ = writeln!(
                s,
                "{i}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{}\t{}",
                wp.x,
                wp.y,
                wp.feed,
                wp.extrusion,
                wp.width,
                fmt_err(wd),
                fmt_err(cl),
            );
        }
    }
    s
}

/// Width summaries of every measured segment, in segment order.
pub fn width_summaries(out: &RunOutput) -> Vec<WidthSummary> {
    out.segments
        .iter()
        .enumerate()
        .filter_map(|(i, seg)| {
            let m = seg.measurement()?;
            let streamed = out.streamed_paths.get(i)?;
            summarize_widths(i, streamed, &m.width_errors)
        })
        .collect()
}

fn width_table(summaries: &[WidthSummary]) -> String {
    let mut s = String::from("segment\tfeed\textrusion\tmean_width\tstdev\tl2_error\n");
    for w in summaries {
        let _ = writeln!(
            s,
            "{}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{:.4}",
            w.segment, w.feed, w.extrusion, w.mean_width, w.stdev, w.l2_error
        );
    }
    s
}

/// Write all diagnostics of `out` into `dir`, creating it if needed.
pub fn write_run_diagnostics(dir: &Path, out: &RunOutput) -> Result<()> {
    fs::create_dir_all(dir)?;

    out.boundary.save(dir.join("edgedata.png"))?;
    let measurements = out.segments.iter().filter_map(|s| s.measurement());
    boundary_overlay(&out.mask, &out.boundary, measurements).save(dir.join("edges.png"))?;

    fs::write(dir.join("pathData.tsv"), path_table(out))?;
    let summaries = width_summaries(out);
    fs::write(dir.join("widths.tsv"), width_table(&summaries))?;
    fs::write(
        dir.join("report.json"),
        serde_json::to_string_pretty(&out.report)?,
    )?;

    info!(
        dir = %dir.display(),
        measured = summaries.len(),
        "diagnostics written"
    );
    Ok(())
}
