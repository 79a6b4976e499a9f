//! Fire-and-forget delivery of detection events to Supabase (PostgREST).

use facewatch_core::{DetectionEvent, EventSink, NullSink};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivery counters shared between a sink and its spawned tasks.
#[derive(Debug, Clone, Default)]
pub struct DeliveryStats {
    stored: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl DeliveryStats {
    pub fn stored(&self) -> u64 {
        self.stored.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Posts each event on a detached tokio task.
///
/// `dispatch` never blocks the caller: the task waits for one of
/// `max_in_flight` permits, makes a single attempt and logs the outcome.
pub struct SupabaseSink {
    client: reqwest::Client,
    endpoint: String,
    key: String,
    runtime: Handle,
    permits: Arc<Semaphore>,
    stats: DeliveryStats,
}

impl SupabaseSink {
    pub fn new(
        base_url: &str,
        key: &str,
        table: &str,
        max_in_flight: usize,
        runtime: Handle,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/rest/v1/{table}", base_url.trim_end_matches('/')),
            key: key.to_string(),
            runtime,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            stats: DeliveryStats::default(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn stats(&self) -> DeliveryStats {
        self.stats.clone()
    }
}

impl EventSink for SupabaseSink {
    fn dispatch(&self, event: DetectionEvent) {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let key = self.key.clone();
        let permits = Arc::clone(&self.permits);
        let stats = self.stats.clone();

        self.runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let sent = client
                .post(&endpoint)
                .header("apikey", &key)
                .bearer_auth(&key)
                .header("Prefer", "return=minimal")
                .json(&event)
                .send()
                .await;

            match sent {
                Ok(resp) if resp.status().is_success() => {
                    stats.stored.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(name = %event.name, confidence = event.confidence, "event stored");
                }
                Ok(resp) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    tracing::warn!(name = %event.name, %status, body = %body, "store rejected event");
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(name = %event.name, error = %e, "failed to deliver event");
                }
            }
        });
    }
}

/// Event sink chosen at startup.
pub enum Dispatcher {
    Supabase(SupabaseSink),
    /// No store configured; events go to [`NullSink`].
    Disabled,
}

impl Dispatcher {
    /// Counters of the configured store; `None` when disabled.
    pub fn stats(&self) -> Option<DeliveryStats> {
        match self {
            Dispatcher::Supabase(sink) => Some(sink.stats()),
            Dispatcher::Disabled => None,
        }
    }
}

impl EventSink for Dispatcher {
    fn dispatch(&self, event: DetectionEvent) {
        match self {
            Dispatcher::Supabase(sink) => sink.dispatch(event),
            Dispatcher::Disabled => NullSink.dispatch(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facewatch_core::{
        AnalyzerError, BoundingBox, Decision, Detection, FaceAnalyzer, Pipeline, Registry,
        UnknownFaceStore,
    };
    use image::RgbImage;
    use std::path::PathBuf;
    use std::time::Instant;

    struct OneFace;

    impl FaceAnalyzer for OneFace {
        fn analyze(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>, AnalyzerError> {
            Ok(vec![Detection {
                bbox: BoundingBox::new(100.0, 100.0, 200.0, 220.0),
                embedding: vec![0.6, 0.8, 0.0],
                score: 0.9,
                landmarks: None,
            }])
        }
    }

    struct NoStore;

    impl UnknownFaceStore for NoStore {
        type Error = String;

        fn save(&self, _crop: &RgbImage, _score: f32) -> Result<PathBuf, String> {
            Err("unused".into())
        }
    }

    fn unreachable_sink(max_in_flight: usize) -> SupabaseSink {
        SupabaseSink::new("http://127.0.0.1:1", "k", "detections", max_in_flight, Handle::current())
            .unwrap()
    }

    async fn wait_for_failures(stats: &DeliveryStats, n: u64) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while stats.failed() < n {
            assert!(Instant::now() < deadline, "deliveries never completed");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[test]
    fn test_endpoint_joins_table() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let sink =
            SupabaseSink::new("https://abc.supabase.co/", "k", "detections", 4, rt.handle().clone())
                .unwrap();
        assert_eq!(sink.endpoint(), "https://abc.supabase.co/rest/v1/detections");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dispatch_returns_immediately_when_unreachable() {
        let sink = unreachable_sink(2);
        let stats = sink.stats();
        let start = Instant::now();
        for _ in 0..10 {
            sink.dispatch(DetectionEvent::unknown(0.9));
        }
        assert!(start.elapsed() < Duration::from_millis(500));

        wait_for_failures(&stats, 10).await;
        assert_eq!(stats.stored(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_delivery_leaves_pipeline_untouched() {
        let dispatcher = Dispatcher::Supabase(unreachable_sink(4));
        let stats = dispatcher.stats().unwrap();
        let registry = Registry::from_groups([("alice", vec![vec![0.6, 0.8, 0.0]])]);
        let config = facewatch_core::PipelineConfig {
            frame_skip: 1,
            ..Default::default()
        };
        let mut pipeline = Pipeline::new(config, registry, dispatcher, NoStore);
        let frame = RgbImage::new(320, 240);
        let t0 = Instant::now();

        let first = pipeline.process_frame(&mut OneFace, &frame, t0);
        assert!(first.decisions[0].1.dispatched());
        wait_for_failures(&stats, 1).await;

        let second = pipeline.process_frame(&mut OneFace, &frame, t0 + Duration::from_secs(1));
        assert_eq!(second.frame, 2);
        assert!(second.analyzed);
        match &second.decisions[0].1 {
            Decision::Known { name, logged, .. } => {
                assert_eq!(name, "alice");
                assert!(!logged);
            }
            other => panic!("expected known face, got {other:?}"),
        }

        let third = pipeline.process_frame(&mut OneFace, &frame, t0 + Duration::from_secs(11));
        assert!(third.decisions[0].1.dispatched());
        wait_for_failures(&stats, 2).await;
    }

    #[tokio::test]
    async fn test_disabled_dispatcher_is_silent() {
        let dispatcher = Dispatcher::Disabled;
        assert!(dispatcher.stats().is_none());
        dispatcher.dispatch(DetectionEvent::known("alice", 0.8));
    }
}
