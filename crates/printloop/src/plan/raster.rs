//! Pixel frame of the print region.
//!
//! Boundary bitmaps, regions of interest and distance fields all live in one
//! image frame covering the print. Column index grows with machine x and row
//! index grows with machine y; `origin` is the machine position of pixel
//! (0, 0).

use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Mapping between machine millimetres and raster pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Raster {
    /// Machine position (mm) of pixel (0, 0).
    pub origin: [f64; 2],
    /// Pixel pitch in mm.
    pub mm_per_px: f64,
    /// Image width (columns).
    pub width_px: u32,
    /// Image height (rows).
    pub height_px: u32,
    /// Width (mm) of the known-path mask drawn around measured rods.
    pub mask_width_mm: f64,
}

impl Raster {
    /// Image dimensions `(width, height)`.
    #[inline]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width_px, self.height_px)
    }

    /// Machine mm → fractional pixel coordinates `[col, row]`.
    #[inline]
    pub fn mm_to_px(&self, xy: [f64; 2]) -> [f64; 2] {
        [
            (xy[0] - self.origin[0]) / self.mm_per_px,
            (xy[1] - self.origin[1]) / self.mm_per_px,
        ]
    }

    /// Fractional pixel coordinates → machine mm.
    #[inline]
    pub fn px_to_mm(&self, px: [f64; 2]) -> [f64; 2] {
        [
            px[0] * self.mm_per_px + self.origin[0],
            px[1] * self.mm_per_px + self.origin[1],
        ]
    }

    /// Nearest pixel to a machine position, if it lies inside the image.
    pub fn pixel_at(&self, xy: [f64; 2]) -> Option<(u32, u32)> {
        let p = self.mm_to_px(xy);
        let c = p[0].round();
        let r = p[1].round();
        if c < 0.0 || r < 0.0 || c >= self.width_px as f64 || r >= self.height_px as f64 {
            return None;
        }
        Some((c as u32, r as u32))
    }

    /// True if a machine position falls inside the image.
    #[inline]
    pub fn contains_mm(&self, xy: [f64; 2]) -> bool {
        self.pixel_at(xy).is_some()
    }

    /// Millimetres → pixels (lengths).
    #[inline]
    pub fn mm_to_px_len(&self, mm: f64) -> f64 {
        mm / self.mm_per_px
    }

    /// Pixels → millimetres (lengths).
    #[inline]
    pub fn px_to_mm_len(&self, px: f64) -> f64 {
        px * self.mm_per_px
    }

    /// A blank single-channel image of the raster size.
    pub fn blank(&self) -> GrayImage {
        GrayImage::new(self.width_px, self.height_px)
    }
}

/// Axis-aligned pixel rectangle (`x`, `y` = top-left, inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    #[inline]
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    #[inline]
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline]
    pub fn contains(&self, col: u32, row: u32) -> bool {
        col >= self.x && col < self.right() && row >= self.y && row < self.bottom()
    }

    /// Intersection with a `width × height` image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Self {
            x,
            y,
            width: self.right().min(width) - x,
            height: self.bottom().min(height) - y,
        }
    }

    /// Split into two halves across the travel axis.
    ///
    /// X travel splits rows (upper half first), Y travel splits columns (left
    /// half first). The first half is the "left" boundary side.
    pub fn split_across(&self, travel_x: bool) -> (Self, Self) {
        if travel_x {
            let h0 = self.height / 2;
            (
                Self::new(self.x, self.y, self.width, h0),
                Self::new(self.x, self.y + h0, self.width, self.height - h0),
            )
        } else {
            let w0 = self.width / 2;
            (
                Self::new(self.x, self.y, w0, self.height),
                Self::new(self.x + w0, self.y, self.width - w0, self.height),
            )
        }
    }
}

/// Visit every pixel within `radius` of the segment `a`–`b` (pixel units).
pub(crate) fn for_each_pixel_in_capsule(
    width: u32,
    height: u32,
    a: [f64; 2],
    b: [f64; 2],
    radius: f64,
    mut visit: impl FnMut(u32, u32),
) {
    if width == 0 || height == 0 || radius < 0.0 {
        return;
    }
    let x0 = (a[0].min(b[0]) - radius).floor().max(0.0) as u32;
    let y0 = (a[1].min(b[1]) - radius).floor().max(0.0) as u32;
    let x1 = (a[0].max(b[0]) + radius).ceil().min((width - 1) as f64);
    let y1 = (a[1].max(b[1]) + radius).ceil().min((height - 1) as f64);
    if x1 < 0.0 || y1 < 0.0 {
        return;
    }
    let (x1, y1) = (x1 as u32, y1 as u32);
    let r2 = radius * radius;
    for row in y0..=y1 {
        for col in x0..=x1 {
            if point_segment_dist2([col as f64, row as f64], a, b) <= r2 {
                visit(col, row);
            }
        }
    }
}

fn point_segment_dist2(p: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
    let ab = [b[0] - a[0], b[1] - a[1]];
    let ap = [p[0] - a[0], p[1] - a[1]];
    let len2 = ab[0] * ab[0] + ab[1] * ab[1];
    let t = if len2 > 0.0 {
        ((ap[0] * ab[0] + ap[1] * ab[1]) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let dx = ap[0] - t * ab[0];
    let dy = ap[1] - t * ab[1];
    dx * dx + dy * dy
}
