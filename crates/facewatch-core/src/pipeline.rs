//! Per-frame decision pipeline.
//!
//! Owns every piece of mutable state (sampler, cached detections, cooldown
//! tables) so one frame is fully decided before the next one arrives.
//! Side effects leave through two seams: [`EventSink`] for store events and
//! [`UnknownFaceStore`] for persisted crops.

use crate::analyzer::FaceAnalyzer;
use crate::cooldown::Cooldown;
use crate::matcher::{CosineMatcher, Matcher};
use crate::quality::{self, CropPadding};
use crate::registry::Registry;
use crate::sampler::FrameSampler;
use crate::types::{Detection, DetectionEvent, Fingerprint, Rgb, UNKNOWN_COLOR};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Tunables of the decision pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Analyze every Nth frame.
    pub frame_skip: u64,
    /// Minimum cosine similarity for a known match.
    pub similarity_threshold: f32,
    pub unknown_save_cooldown_secs: f64,
    pub known_log_cooldown_secs: f64,
    /// Minimum detector score before an unknown face is considered.
    pub min_detection_score: f32,
    /// Minimum Laplacian variance of an unknown crop.
    pub blur_threshold: f64,
    /// Pixels an unknown face must keep from every frame edge.
    pub min_frame_edge_distance: u32,
    pub crop_padding: CropPadding,
    /// Forget cooldown entries older than this many windows; 0 keeps them forever.
    pub cooldown_sweep_windows: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_skip: 3,
            similarity_threshold: 0.45,
            unknown_save_cooldown_secs: 10.0,
            known_log_cooldown_secs: 10.0,
            min_detection_score: 0.5,
            blur_threshold: 180.0,
            min_frame_edge_distance: 30,
            crop_padding: CropPadding::default(),
            cooldown_sweep_windows: 0,
        }
    }
}

fn window(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

/// Fire-and-forget delivery of accepted events.
///
/// Implementations must return without waiting on delivery and must never
/// surface delivery failures to the caller.
pub trait EventSink {
    fn dispatch(&self, event: DetectionEvent);
}

/// Sink used when no external store is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn dispatch(&self, event: DetectionEvent) {
        tracing::debug!(name = %event.name, confidence = event.confidence, "store disabled; event dropped");
    }
}

/// Persists accepted unknown-face crops.
pub trait UnknownFaceStore {
    type Error: std::fmt::Display;

    fn save(&self, crop: &RgbImage, score: f32) -> Result<PathBuf, Self::Error>;
}

/// Why an unknown face was or was not saved.
#[derive(Debug, Clone, PartialEq)]
pub enum UnknownOutcome {
    /// Box too close to the frame edge.
    CutOff,
    /// Detector score under the minimum.
    LowScore,
    /// Same fingerprint saved within the window.
    CoolingDown,
    Blurry,
    Saved(PathBuf),
    SaveFailed,
}

/// Decision for one detection in one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Known {
        name: String,
        similarity: f32,
        color: Rgb,
        /// Whether an event was dispatched for this detection.
        logged: bool,
    },
    Unknown {
        score: f32,
        outcome: UnknownOutcome,
    },
}

impl Decision {
    /// Overlay label, e.g. `Alice 93.1%` or `Unknown 0.87`.
    pub fn label(&self) -> String {
        match self {
            Decision::Known { name, similarity, .. } => format!("{name} {:.1}%", similarity * 100.0),
            Decision::Unknown { score, .. } => format!("Unknown {score:.2}"),
        }
    }

    pub fn color(&self) -> Rgb {
        match self {
            Decision::Known { color, .. } => *color,
            Decision::Unknown { .. } => UNKNOWN_COLOR,
        }
    }

    pub fn dispatched(&self) -> bool {
        matches!(
            self,
            Decision::Known { logged: true, .. }
                | Decision::Unknown { outcome: UnknownOutcome::Saved(_), .. }
        )
    }
}

/// Everything decided for one frame.
#[derive(Debug, Clone)]
pub struct FrameReport {
    /// Frame counter value for this frame (1-based).
    pub frame: u64,
    /// Whether the analyzer ran on this frame.
    pub analyzed: bool,
    /// One entry per cached detection, in detector order.
    pub decisions: Vec<(Detection, Decision)>,
}

/// Pipeline context: registry, matcher, throttles and side-effect seams.
pub struct Pipeline<S, U, M = CosineMatcher> {
    config: PipelineConfig,
    registry: Registry,
    matcher: M,
    sampler: FrameSampler,
    last_detections: Vec<Detection>,
    known_log: Cooldown<String>,
    unknown_save: Cooldown<Fingerprint>,
    last_sweep: Option<Instant>,
    sink: S,
    store: U,
}

impl<S: EventSink, U: UnknownFaceStore> Pipeline<S, U, CosineMatcher> {
    pub fn new(config: PipelineConfig, registry: Registry, sink: S, store: U) -> Self {
        Self::with_matcher(config, registry, CosineMatcher, sink, store)
    }
}

impl<S: EventSink, U: UnknownFaceStore, M: Matcher> Pipeline<S, U, M> {
    pub fn with_matcher(config: PipelineConfig, registry: Registry, matcher: M, sink: S, store: U) -> Self {
        Self {
            sampler: FrameSampler::new(config.frame_skip),
            known_log: Cooldown::new(window(config.known_log_cooldown_secs)),
            unknown_save: Cooldown::new(window(config.unknown_save_cooldown_secs)),
            last_detections: Vec::new(),
            last_sweep: None,
            config,
            registry,
            matcher,
            sink,
            store,
        }
    }

    /// Process one frame: sample, then decide every cached detection.
    ///
    /// Analyzer failures are logged and clear the cached detections; they
    /// never abort the loop.
    pub fn process_frame<A: FaceAnalyzer + ?Sized>(
        &mut self,
        analyzer: &mut A,
        frame: &RgbImage,
        now: Instant,
    ) -> FrameReport {
        let analyzed = self.sampler.tick();
        if analyzed {
            self.last_detections = match analyzer.analyze(frame) {
                Ok(detections) => detections,
                Err(e) => {
                    tracing::warn!(frame = self.sampler.frames(), error = %e, "face analysis failed");
                    Vec::new()
                }
            };
        }
        self.maybe_sweep(now);

        let detections = std::mem::take(&mut self.last_detections);
        let decisions = detections
            .iter()
            .map(|det| (det.clone(), self.decide(det, frame, now)))
            .collect();
        self.last_detections = detections;

        FrameReport {
            frame: self.sampler.frames(),
            analyzed,
            decisions,
        }
    }

    /// Decide a single detection against the current frame.
    pub fn decide(&mut self, det: &Detection, frame: &RgbImage, now: Instant) -> Decision {
        let result = self.matcher.best_match(&det.embedding, &self.registry);
        match result
            .accepted(self.config.similarity_threshold)
            .and_then(|idx| self.registry.identity(idx))
        {
            Some(identity) => {
                let name = identity.name.clone();
                let color = identity.color;
                let logged = self.known_log.try_acquire(name.clone(), now);
                if logged {
                    tracing::info!(name = %name, similarity = result.similarity, "known face logged");
                    self.sink.dispatch(DetectionEvent::known(name.clone(), result.similarity));
                }
                Decision::Known {
                    name,
                    similarity: result.similarity,
                    color,
                    logged,
                }
            }
            None => Decision::Unknown {
                score: det.score,
                outcome: self.handle_unknown(det, frame, now),
            },
        }
    }

    fn handle_unknown(&mut self, det: &Detection, frame: &RgbImage, now: Instant) -> UnknownOutcome {
        let cfg = &self.config;
        if !quality::is_inside_frame(&det.bbox, frame.width(), frame.height(), cfg.min_frame_edge_distance) {
            tracing::debug!(bbox = ?det.bbox, "face cut off by frame edge");
            return UnknownOutcome::CutOff;
        }
        if det.score < cfg.min_detection_score {
            return UnknownOutcome::LowScore;
        }

        let fingerprint = Fingerprint::of(&det.embedding);
        if !self.unknown_save.is_ready(&fingerprint, now) {
            return UnknownOutcome::CoolingDown;
        }

        let rect = quality::padded_crop(&det.bbox, &cfg.crop_padding, frame.width(), frame.height());
        if rect.is_empty() {
            return UnknownOutcome::Blurry;
        }
        let crop = quality::crop(frame, &rect);
        if !quality::is_sharp(&crop, cfg.blur_threshold) {
            return UnknownOutcome::Blurry;
        }

        self.unknown_save.mark(fingerprint, now);
        match self.store.save(&crop, det.score) {
            Ok(path) => {
                tracing::info!(path = %path.display(), score = det.score, "unknown face saved");
                self.sink.dispatch(DetectionEvent::unknown(det.score));
                UnknownOutcome::Saved(path)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to save unknown face");
                UnknownOutcome::SaveFailed
            }
        }
    }

    fn maybe_sweep(&mut self, now: Instant) {
        let windows = self.config.cooldown_sweep_windows;
        if windows == 0 {
            return;
        }
        let period = self.known_log.window().min(self.unknown_save.window());
        if let Some(last) = self.last_sweep {
            if now.saturating_duration_since(last) < period {
                return;
            }
        }
        self.last_sweep = Some(now);

        let known = self
            .known_log
            .sweep(now, self.known_log.window().saturating_mul(windows));
        let unknown = self
            .unknown_save
            .sweep(now, self.unknown_save.window().saturating_mul(windows));
        if known + unknown > 0 {
            tracing::debug!(known, unknown, "swept stale cooldown entries");
        }
    }
}
