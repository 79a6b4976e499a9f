use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Axis-aligned face box in pixel coordinates of the processed frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = BoundingBox {
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
            x2: self.x2.min(other.x2),
            y2: self.y2.min(other.y2),
        }
        .area();
        let union = self.area() + other.area() - inter;
        if union > 0.0 { inter / union } else { 0.0 }
    }

    /// Integer pixel coordinates, truncated toward zero.
    pub fn to_pixels(&self) -> (i64, i64, i64, i64) {
        (
            self.x1 as i64,
            self.y1 as i64,
            self.x2 as i64,
            self.y2 as i64,
        )
    }
}

/// One face found in one analyzed frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Raw (unnormalized) embedding produced by the recognizer.
    pub embedding: Vec<f32>,
    /// Detector confidence in [0, 1].
    pub score: f32,
    /// Five-point landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Exact-match dedup key for an embedding.
///
/// SHA-256 over the little-endian bytes of every component, so two
/// embeddings share a fingerprint only when they are bit-identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(embedding: &[f32]) -> Self {
        let mut hasher = Sha256::new();
        for v in embedding {
            hasher.update(v.to_le_bytes());
        }
        Self(hasher.finalize().into())
    }
}

/// Payload handed to the event sink, passed by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub name: String,
    pub confidence: f32,
    pub is_known: bool,
}

impl DetectionEvent {
    pub const UNKNOWN_NAME: &'static str = "Unknown";

    pub fn known(name: impl Into<String>, similarity: f32) -> Self {
        Self {
            name: name.into(),
            confidence: similarity,
            is_known: true,
        }
    }

    pub fn unknown(score: f32) -> Self {
        Self {
            name: Self::UNKNOWN_NAME.to_string(),
            confidence: score,
            is_known: false,
        }
    }
}

/// Display color for a box and label.
pub type Rgb = [u8; 3];

/// Color used for unmatched faces.
pub const UNKNOWN_COLOR: Rgb = [255, 0, 0];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_identical() {
        let a = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        // Overlap 50, union 150
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_fingerprint_exact_match_only() {
        let a = Fingerprint::of(&[0.25, -1.0, 3.5]);
        let b = Fingerprint::of(&[0.25, -1.0, 3.5]);
        let c = Fingerprint::of(&[0.25, -1.0, 3.5000002]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_fingerprint_distinguishes_signed_zero() {
        assert_ne!(Fingerprint::of(&[0.0]), Fingerprint::of(&[-0.0]));
    }

    #[test]
    fn test_event_constructors() {
        let k = DetectionEvent::known("Alice", 0.9);
        assert!(k.is_known);
        let u = DetectionEvent::unknown(0.7);
        assert_eq!(u.name, "Unknown");
        assert!(!u.is_known);
    }
}
