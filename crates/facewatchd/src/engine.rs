use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::store::{FsUnknownStore, StoreError};
use facewatch_core::{
    AnalyzerError, EventSink, FaceAnalyzer, OnnxFaceAnalyzer, Pipeline, Registry, RegistryError,
    UnknownFaceStore,
};
use facewatch_hw::{Camera, Frame};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] facewatch_hw::CameraError),
    #[error("model error: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("enrollment error: {0}")]
    Registry(#[from] RegistryError),
    #[error("unknown-face store error: {0}")]
    Store(#[from] StoreError),
}

/// Load both ONNX models. Fails fast when either file is unusable.
pub fn load_analyzer(config: &Config) -> Result<OnnxFaceAnalyzer, EngineError> {
    let detector = config.detector_path();
    let recognizer = config.recognizer_path();
    let analyzer = OnnxFaceAnalyzer::load(
        &detector,
        &recognizer,
        config.detector_input_size,
        config.detector_threshold,
    )?;
    tracing::info!(
        detector = %detector.display(),
        recognizer = %recognizer.display(),
        input_size = config.detector_input_size,
        "face models loaded"
    );
    Ok(analyzer)
}

/// Build the identity registry from the enrollment folders.
pub fn load_registry<A: FaceAnalyzer + ?Sized>(
    config: &Config,
    analyzer: &mut A,
) -> Result<Registry, EngineError> {
    let registry = Registry::build(&config.faces_dir, analyzer)?;
    tracing::info!(
        identities = registry.len(),
        dim = registry.dim(),
        path = %config.faces_dir.display(),
        "registry loaded"
    );
    Ok(registry)
}

/// Run the recognition loop until `stop` is set or capture fails.
///
/// Blocking: call from a dedicated thread or `spawn_blocking`. Camera and
/// models are owned here and released on return.
pub fn run(config: &Config, sink: Dispatcher, stop: &AtomicBool) -> Result<(), EngineError> {
    let mut analyzer = load_analyzer(config)?;
    let registry = load_registry(config, &mut analyzer)?;
    let store = FsUnknownStore::create(&config.unknown_dir)?;
    tracing::info!(path = %store.dir().display(), "unknown faces directory ready");

    let camera = Camera::open(&config.camera_device, config.capture_width, config.capture_height)?;
    tracing::info!(
        device = %camera.device_path,
        width = camera.width,
        height = camera.height,
        format = ?camera.pixel_format,
        "camera opened"
    );

    let mut pipeline = Pipeline::new(config.pipeline.clone(), registry, sink, store);
    camera.stream(|frame| step(&mut pipeline, &mut analyzer, frame, config.mirror, stop))?;

    tracing::info!("recognition loop stopped");
    Ok(())
}

/// Process one captured frame. Breaks once `stop` is observed.
fn step<S, U, A>(
    pipeline: &mut Pipeline<S, U>,
    analyzer: &mut A,
    mut frame: Frame,
    mirror: bool,
    stop: &AtomicBool,
) -> ControlFlow<()>
where
    S: EventSink,
    U: UnknownFaceStore,
    A: FaceAnalyzer + ?Sized,
{
    if stop.load(Ordering::Relaxed) {
        return ControlFlow::Break(());
    }
    if mirror {
        frame.mirror();
    }

    let report = pipeline.process_frame(analyzer, &frame.image, frame.timestamp);
    if report.analyzed {
        for (det, decision) in &report.decisions {
            tracing::debug!(
                frame = report.frame,
                seq = frame.sequence,
                label = %decision.label(),
                color = ?decision.color(),
                bbox = ?det.bbox,
                "face"
            );
        }
    }
    ControlFlow::Continue(())
}
