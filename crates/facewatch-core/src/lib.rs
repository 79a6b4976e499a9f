//! Identity matching and event throttling for a stream of face detections.
//!
//! Turns a high-frequency stream of face detections into a deduplicated,
//! quality-filtered stream of identity events. Detection and embedding run
//! through SCRFD and ArcFace on ONNX Runtime behind the [`FaceAnalyzer`] seam.

pub mod alignment;
pub mod analyzer;
pub mod cooldown;
pub mod detector;
pub mod matcher;
pub mod pipeline;
pub mod quality;
pub mod recognizer;
pub mod registry;
pub mod sampler;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxFaceAnalyzer};
pub use cooldown::Cooldown;
pub use matcher::{CosineMatcher, MatchResult, Matcher};
pub use pipeline::{
    Decision, EventSink, FrameReport, NullSink, Pipeline, PipelineConfig, UnknownFaceStore,
    UnknownOutcome,
};
pub use quality::CropPadding;
pub use registry::{Identity, Registry, RegistryError};
pub use sampler::FrameSampler;
pub use types::{BoundingBox, Detection, DetectionEvent, Fingerprint, Rgb};
