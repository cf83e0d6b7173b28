//! Shared fixtures for unit tests.

use std::ops::Range;

use image::{GrayImage, Luma};

use crate::plan::Raster;

/// Raster with 1 mm pixels at the origin, so pixel and mm values coincide.
pub(crate) fn unit_raster(width: u32, height: u32) -> Raster {
    Raster {
        origin: [0.0, 0.0],
        mm_per_px: 1.0,
        width_px: width,
        height_px: height,
        mask_width_mm: 4.0,
    }
}

/// Boundary bitmap with horizontal boundary lines at the given rows, spanning
/// `cols`.
pub(crate) fn boundary_rows(
    raster: &Raster,
    left_row: Option<u32>,
    right_row: Option<u32>,
    cols: Range<u32>,
) -> GrayImage {
    let mut img = raster.blank();
    for row in [left_row, right_row].into_iter().flatten() {
        for col in cols.clone() {
            if col < img.width() && row < img.height() {
                img.put_pixel(col, row, Luma([255]));
            }
        }
    }
    img
}
