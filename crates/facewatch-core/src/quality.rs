//! Quality gate for unmatched faces: frame containment, padded crop and
//! Laplacian sharpness.

use crate::types::BoundingBox;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Extra pixels kept around a face box when cropping it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropPadding {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Default for CropPadding {
    fn default() -> Self {
        // Extra room below the chin
        Self {
            left: 30,
            top: 30,
            right: 30,
            bottom: 60,
        }
    }
}

/// Crop rectangle in frame pixels, clamped to the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// True when the box keeps at least `margin` pixels from every frame edge.
pub fn is_inside_frame(bbox: &BoundingBox, frame_width: u32, frame_height: u32, margin: u32) -> bool {
    let (x1, y1, x2, y2) = bbox.to_pixels();
    let m = margin as i64;
    let w = frame_width as i64;
    let h = frame_height as i64;
    !(x1 < m || y1 < m || x2 > w - m || y2 > h - m)
}

/// Pad the box and clamp it to the frame.
pub fn padded_crop(bbox: &BoundingBox, padding: &CropPadding, frame_width: u32, frame_height: u32) -> CropRect {
    let (x1, y1, x2, y2) = bbox.to_pixels();
    let w = frame_width as i64;
    let h = frame_height as i64;

    let cx1 = (x1 - padding.left as i64).clamp(0, w);
    let cy1 = (y1 - padding.top as i64).clamp(0, h);
    let cx2 = (x2 + padding.right as i64).clamp(0, w);
    let cy2 = (y2 + padding.bottom as i64).clamp(0, h);

    CropRect {
        x: cx1 as u32,
        y: cy1 as u32,
        width: (cx2 - cx1).max(0) as u32,
        height: (cy2 - cy1).max(0) as u32,
    }
}

/// Copy the crop region out of the frame.
pub fn crop(frame: &RgbImage, rect: &CropRect) -> RgbImage {
    image::imageops::crop_imm(frame, rect.x, rect.y, rect.width, rect.height).to_image()
}

/// 8-bit BT.601 luma, rounded like common BGR→gray conversions.
fn luma(image: &RgbImage) -> Vec<f64> {
    image
        .pixels()
        .map(|p| {
            let y = 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64;
            y.round().clamp(0.0, 255.0)
        })
        .collect()
}

/// Reflect-101 border index: `-1 → 1`, `n → n-2`.
fn reflect101(i: i64, n: i64) -> usize {
    if n == 1 {
        return 0;
    }
    let mut i = i;
    if i < 0 {
        i = -i;
    }
    if i >= n {
        i = 2 * (n - 1) - i;
    }
    i.clamp(0, n - 1) as usize
}

/// Variance of the 4-neighbour Laplacian over the grayscale image.
///
/// Higher means sharper. An empty image scores 0.
pub fn laplacian_variance(image: &RgbImage) -> f64 {
    let (w, h) = (image.width() as i64, image.height() as i64);
    if w == 0 || h == 0 {
        return 0.0;
    }
    let gray = luma(image);
    let at = |x: i64, y: i64| gray[reflect101(y, h) * w as usize + reflect101(x, w)];

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 0..h {
        for x in 0..w {
            let lap = at(x, y - 1) + at(x - 1, y) + at(x + 1, y) + at(x, y + 1) - 4.0 * at(x, y);
            sum += lap;
            sum_sq += lap * lap;
        }
    }
    let n = (w * h) as f64;
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

/// A crop is clear enough to keep when its Laplacian variance exceeds `threshold`.
pub fn is_sharp(image: &RgbImage, threshold: f64) -> bool {
    if image.width() == 0 || image.height() == 0 {
        return false;
    }
    laplacian_variance(image) > threshold
}
