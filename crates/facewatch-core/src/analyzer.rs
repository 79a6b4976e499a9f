//! Detection + embedding collaborator.

use crate::alignment;
use crate::detector::{DetectorError, FaceBox, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::Detection;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Produces, for every face in a frame, its box, embedding and score.
pub trait FaceAnalyzer {
    fn analyze(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, AnalyzerError>;
}

/// SCRFD detection followed by aligned ArcFace embedding.
pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceAnalyzer {
    pub fn load(
        detector_path: &Path,
        recognizer_path: &Path,
        input_size: usize,
        score_threshold: f32,
    ) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(detector_path, input_size, score_threshold)?;
        if !detector.has_landmarks() {
            tracing::warn!(
                path = %detector_path.display(),
                "detector has no landmark heads; embedding unaligned box crops"
            );
        }
        Ok(Self {
            detector,
            recognizer: FaceRecognizer::load(recognizer_path)?,
        })
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn analyze(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, AnalyzerError> {
        let faces = self.detector.detect(frame)?;
        let mut detections = Vec::with_capacity(faces.len());

        for face in faces {
            let embedding = self.recognizer.embed(&face_crop(frame, &face))?;
            detections.push(Detection {
                bbox: face.bbox,
                embedding,
                score: face.score,
                landmarks: face.landmarks,
            });
        }

        Ok(detections)
    }
}

/// Recognizer input for one detected face: landmark-aligned when the
/// detector provides landmarks, otherwise the resized box.
fn face_crop(frame: &RgbImage, face: &FaceBox) -> RgbImage {
    match &face.landmarks {
        Some(landmarks) => alignment::align_face(frame, landmarks),
        None => alignment::resize_box(frame, &face.bbox),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::ALIGNED_SIZE;
    use crate::types::BoundingBox;
    use image::Rgb;

    #[test]
    fn test_face_without_landmarks_still_gets_a_crop() {
        let frame = RgbImage::from_pixel(320, 240, Rgb([70, 80, 90]));
        let face = FaceBox {
            bbox: BoundingBox::new(100.0, 60.0, 180.0, 160.0),
            score: 0.8,
            landmarks: None,
        };
        let crop = face_crop(&frame, &face);
        assert_eq!(crop.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        assert_eq!(crop.get_pixel(10, 10), &Rgb([70, 80, 90]));
    }

    #[test]
    fn test_face_with_landmarks_is_aligned() {
        let frame = RgbImage::from_pixel(320, 240, Rgb([70, 80, 90]));
        let landmarks = [(140.0, 100.0), (170.0, 100.0), (155.0, 115.0), (143.0, 132.0), (167.0, 132.0)];
        let face = FaceBox {
            bbox: BoundingBox::new(120.0, 70.0, 190.0, 150.0),
            score: 0.8,
            landmarks: Some(landmarks),
        };
        let crop = face_crop(&frame, &face);
        assert_eq!(crop.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        assert_eq!(crop.get_pixel(56, 56), &Rgb([70, 80, 90]));
    }
}
