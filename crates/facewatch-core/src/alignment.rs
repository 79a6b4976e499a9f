//! Five-point face alignment onto the ArcFace 112×112 template.
//!
//! Fits a 4-DOF similarity transform (scale, rotation, translation) from the
//! detected landmarks to the template in closed form, then samples the
//! source frame bilinearly through the inverse transform.

use crate::types::BoundingBox;
use image::{imageops::FilterType, Rgb, RgbImage};

pub const ALIGNED_SIZE: u32 = 112;

/// ArcFace template landmarks for a 112×112 crop.
const TEMPLATE_112: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// Similarity transform `q = R·p + t` with `R = [[a, -b], [b, a]]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    /// Least-squares fit mapping `src` onto `dst`.
    pub fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (sx, sy) = mean(src);
        let (dx, dy) = mean(dst);

        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        let mut energy = 0.0f32;
        for (&(px, py), &(qx, qy)) in src.iter().zip(dst) {
            let (px, py) = (px - sx, py - sy);
            let (qx, qy) = (qx - dx, qy - dy);
            dot += px * qx + py * qy;
            cross += px * qy - py * qx;
            energy += px * px + py * py;
        }

        if energy <= f32::EPSILON {
            // Degenerate landmarks: pure translation
            return Self { a: 1.0, b: 0.0, tx: dx - sx, ty: dy - sy };
        }

        let a = dot / energy;
        let b = cross / energy;
        Self {
            a,
            b,
            tx: dx - (a * sx - b * sy),
            ty: dy - (b * sx + a * sy),
        }
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Inverse mapping; `None` when the transform collapses the plane.
    pub fn invert(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det <= f32::EPSILON {
            return None;
        }
        let (ia, ib) = (self.a / det, -self.b / det);
        Some(Self {
            a: ia,
            b: ib,
            tx: -(ia * self.tx - ib * self.ty),
            ty: -(ib * self.tx + ia * self.ty),
        })
    }
}

/// Warp the face described by `landmarks` into a 112×112 RGB crop.
pub fn align_face(frame: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let forward = Similarity::estimate(landmarks, &TEMPLATE_112);
    let Some(inverse) = forward.invert() else {
        return RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    };

    RgbImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |u, v| {
        let (x, y) = inverse.apply((u as f32, v as f32));
        sample_bilinear(frame, x, y)
    })
}

/// Fallback for detections without landmarks: the box, clamped to the
/// frame, stretched to 112×112. A box entirely outside the frame gives a
/// black crop.
pub fn resize_box(frame: &RgbImage, bbox: &BoundingBox) -> RgbImage {
    let (fw, fh) = (frame.width() as f32, frame.height() as f32);
    let x1 = bbox.x1.clamp(0.0, fw).floor() as u32;
    let y1 = bbox.y1.clamp(0.0, fh).floor() as u32;
    let x2 = bbox.x2.clamp(0.0, fw).ceil() as u32;
    let y2 = bbox.y2.clamp(0.0, fh).ceil() as u32;
    if x2 <= x1 || y2 <= y1 {
        return RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    }
    let region = image::imageops::crop_imm(frame, x1, y1, x2 - x1, y2 - y1).to_image();
    image::imageops::resize(&region, ALIGNED_SIZE, ALIGNED_SIZE, FilterType::Triangle)
}

/// Bilinear sample; points outside the frame read as black.
fn sample_bilinear(frame: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = (frame.width() as i64, frame.height() as i64);
    let (x0, y0) = (x.floor() as i64, y.floor() as i64);
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let texel = |px: i64, py: i64| -> [f32; 3] {
        if px < 0 || py < 0 || px >= w || py >= h {
            [0.0; 3]
        } else {
            let p = frame.get_pixel(px as u32, py as u32);
            [p[0] as f32, p[1] as f32, p[2] as f32]
        }
    };

    let (tl, tr) = (texel(x0, y0), texel(x0 + 1, y0));
    let (bl, br) = (texel(x0, y0 + 1), texel(x0 + 1, y0 + 1));
    Rgb(std::array::from_fn(|c| {
        let top = tl[c] * (1.0 - fx) + tr[c] * fx;
        let bot = bl[c] * (1.0 - fx) + br[c] * fx;
        (top * (1.0 - fy) + bot * fy).round().clamp(0.0, 255.0) as u8
    }))
}
