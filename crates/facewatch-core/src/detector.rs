//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes an RGB frame to a square input, decodes the three stride
//! heads (scores, box distances, landmark offsets) and merges them with NMS.

use crate::types::BoundingBox;
use image::{imageops::FilterType, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("input size {0} must be a positive multiple of 32")]
    InvalidInputSize(usize),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A face candidate before embedding extraction.
#[derive(Debug, Clone)]
pub struct FaceBox {
    pub bbox: BoundingBox,
    pub score: f32,
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Scale and offset applied when fitting the frame into the model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    width: u32,
    height: u32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, size: usize) -> Self {
        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, size as u32);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, size as u32);
        Self {
            scale,
            width: new_w,
            height: new_h,
            pad_x: (size as u32 - new_w) / 2,
            pad_y: (size as u32 - new_h) / 2,
        }
    }

    /// Map a point from model-input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Output slot indices (score, bbox, kps) for one stride.
type StrideSlots = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    input_size: usize,
    score_threshold: f32,
    slots: [StrideSlots; 3],
    has_landmarks: bool,
}

impl FaceDetector {
    /// Load an SCRFD model. `input_size` is the square side fed to the network.
    pub fn load(model_path: &Path, input_size: usize, score_threshold: f32) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }
        if input_size == 0 || input_size % 32 != 0 {
            return Err(DetectorError::InvalidInputSize(input_size));
        }

        let session = Session::builder()?
            .with_intra_threads(2).map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        let has_landmarks = match names.len() {
            9 => true,
            6 => false,
            n => {
                return Err(DetectorError::InferenceFailed(format!(
                    "SCRFD model must expose 6 or 9 outputs, got {n}"
                )))
            }
        };
        let slots = output_slots(&names);

        tracing::info!(
            path = %model_path.display(),
            input_size,
            outputs = ?names,
            has_landmarks,
            "loaded SCRFD model"
        );

        Ok(Self {
            session,
            input_size,
            score_threshold,
            slots,
            has_landmarks,
        })
    }

    /// Whether the model emits 5-point landmarks.
    pub fn has_landmarks(&self) -> bool {
        self.has_landmarks
    }

    /// Detect faces in an RGB frame, highest score first.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceBox>, DetectorError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }
        let (input, letterbox) = self.preprocess(frame);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.slots[pos];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, distances) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("boxes stride {stride}: {e}")))?;
            let kps = if self.has_landmarks {
                let (_, kps) = outputs[kps_idx]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;
                Some(kps)
            } else {
                None
            };

            let grid = StrideGrid {
                stride,
                cols: self.input_size / stride,
                rows: self.input_size / stride,
            };
            candidates.extend(grid.decode(scores, distances, kps, &letterbox, self.score_threshold));
        }

        Ok(non_max_suppression(candidates, SCRFD_NMS_THRESHOLD))
    }

    /// Letterbox the frame into a normalized NCHW tensor.
    fn preprocess(&self, frame: &RgbImage) -> (Array4<f32>, Letterbox) {
        let size = self.input_size;
        let letterbox = Letterbox::fit(frame.width(), frame.height(), size);
        let resized = image::imageops::resize(frame, letterbox.width, letterbox.height, FilterType::Triangle);

        // Padding normalizes to 0.0
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let tx = (x + letterbox.pad_x) as usize;
            let ty = (y + letterbox.pad_y) as usize;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
            }
        }

        (tensor, letterbox)
    }
}

/// Anchor grid of one stride head.
struct StrideGrid {
    stride: usize,
    cols: usize,
    rows: usize,
}

impl StrideGrid {
    fn decode(
        &self,
        scores: &[f32],
        distances: &[f32],
        kps: Option<&[f32]>,
        letterbox: &Letterbox,
        threshold: f32,
    ) -> Vec<FaceBox> {
        let stride = self.stride as f32;
        let anchors = self.rows * self.cols * SCRFD_ANCHORS_PER_CELL;
        let mut faces = Vec::new();

        for idx in 0..anchors.min(scores.len()) {
            let score = scores[idx];
            if score < threshold {
                continue;
            }
            let Some(d) = distances.get(idx * 4..idx * 4 + 4) else {
                continue;
            };
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % self.cols) as f32 * stride;
            let ay = (cell / self.cols) as f32 * stride;

            let (x1, y1) = letterbox.unmap(ax - d[0] * stride, ay - d[1] * stride);
            let (x2, y2) = letterbox.unmap(ax + d[2] * stride, ay + d[3] * stride);

            let landmarks = kps
                .and_then(|k| k.get(idx * 10..idx * 10 + 10))
                .map(|k| {
                    std::array::from_fn(|i| {
                        letterbox.unmap(ax + k[i * 2] * stride, ay + k[i * 2 + 1] * stride)
                    })
                });

            faces.push(FaceBox {
                bbox: BoundingBox::new(x1, y1, x2, y2),
                score,
                landmarks,
            });
        }

        faces
    }
}

/// Map output tensors to stride slots by name (`score_8`, `bbox_16`, ...),
/// falling back to the exporter's positional order.
fn output_slots(names: &[String]) -> [StrideSlots; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let by_name: Option<Vec<StrideSlots>> = SCRFD_STRIDES
        .iter()
        .map(|&s| {
            let kps = if names.len() == 9 { find("kps", s)? } else { 0 };
            Some((find("score", s)?, find("bbox", s)?, kps))
        })
        .collect();

    match by_name {
        Some(slots) => [slots[0], slots[1], slots[2]],
        None if names.len() == 6 => [(0, 3, 0), (1, 4, 0), (2, 5, 0)],
        None => [(0, 3, 6), (1, 4, 7), (2, 5, 8)],
    }
}

/// Greedy NMS; the result is sorted by descending score.
fn non_max_suppression(mut faces: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    faces.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<FaceBox> = Vec::with_capacity(faces.len());
    for face in faces {
        if kept.iter().all(|k| k.bbox.iou(&face.bbox) <= iou_threshold) {
            kept.push(face);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> FaceBox {
        FaceBox {
            bbox: BoundingBox::new(x1, y1, x2, y2),
            score,
            landmarks: None,
        }
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let kept = non_max_suppression(
            vec![
                face(5.0, 5.0, 105.0, 105.0, 0.8),
                face(0.0, 0.0, 100.0, 100.0, 0.9),
                face(200.0, 200.0, 250.0, 250.0, 0.7),
            ],
            0.4,
        );
        let scores: Vec<f32> = kept.iter().map(|f| f.score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
    }

    #[test]
    fn test_nms_empty() {
        assert!(non_max_suppression(Vec::new(), 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_wide_frame() {
        let lb = Letterbox::fit(320, 160, 160);
        assert!((lb.scale - 0.5).abs() < 1e-6);
        assert_eq!((lb.width, lb.height), (160, 80));
        assert_eq!((lb.pad_x, lb.pad_y), (0, 40));
        let (x, y) = lb.unmap(80.0, 80.0);
        assert!((x - 160.0).abs() < 1e-4 && (y - 80.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_single_anchor() {
        // 32x32 input, stride 16 → 2x2 grid, 8 anchors
        let grid = StrideGrid { stride: 16, cols: 2, rows: 2 };
        let mut scores = vec![0.0f32; 8];
        scores[3] = 0.9; // cell 1 → (x=16, y=0)
        let mut distances = vec![0.0f32; 32];
        distances[12..16].copy_from_slice(&[0.5, 0.0, 1.0, 2.0]);
        let lb = Letterbox { scale: 1.0, width: 32, height: 32, pad_x: 0, pad_y: 0 };

        let faces = grid.decode(&scores, &distances, None, &lb, 0.5);
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].bbox, BoundingBox::new(8.0, 0.0, 32.0, 32.0));
        assert!(faces[0].landmarks.is_none());
    }

    #[test]
    fn test_output_slots_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(output_slots(&names), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_output_slots_positional() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(output_slots(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
        let names: Vec<String> = (0..6).map(|i: usize| i.to_string()).collect();
        assert_eq!(output_slots(&names), [(0, 3, 0), (1, 4, 0), (2, 5, 0)]);
    }
}
