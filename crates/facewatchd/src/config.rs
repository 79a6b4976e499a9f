use facewatch_core::PipelineConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file, then `FACEWATCH_*`
/// environment variables. Store credentials come from `SUPABASE_URL` and
/// `SUPABASE_KEY` (usually via `.env`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    pub capture_width: u32,
    pub capture_height: u32,
    /// Flip frames left-right before processing.
    pub mirror: bool,
    /// Directory containing the ONNX models.
    pub model_dir: PathBuf,
    pub detector_model: String,
    pub recognizer_model: String,
    /// Square input side for the detector (multiple of 32).
    pub detector_input_size: usize,
    /// Detector score below which candidates are discarded outright.
    pub detector_threshold: f32,
    /// Enrollment tree: `<faces_dir>/<name>/<images>`.
    pub faces_dir: PathBuf,
    /// Output directory for unknown-face crops.
    pub unknown_dir: PathBuf,
    /// Concurrent store requests allowed in flight.
    pub dispatch_max_in_flight: usize,
    pub pipeline: PipelineConfig,
    pub supabase: SupabaseConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SupabaseConfig {
    pub url: Option<String>,
    pub key: Option<String>,
    /// Target table.
    pub table: Option<String>,
}

impl SupabaseConfig {
    /// Normalized base URL and key, or `None` when the store is not configured.
    pub fn credentials(&self) -> Option<(String, String)> {
        let url = self.url.as_deref().map(str::trim).filter(|u| !u.is_empty())?;
        let key = self.key.as_deref().map(str::trim).filter(|k| !k.is_empty())?;
        let url = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("https://{url}")
        };
        Some((url.trim_end_matches('/').to_string(), key.to_string()))
    }

    pub fn table(&self) -> &str {
        self.table.as_deref().unwrap_or("detections")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            capture_width: 1080,
            capture_height: 720,
            mirror: true,
            model_dir: PathBuf::from("models"),
            detector_model: "det_500m.onnx".to_string(),
            recognizer_model: "w600k_mbf.onnx".to_string(),
            detector_input_size: 160,
            detector_threshold: 0.5,
            faces_dir: PathBuf::from("faces"),
            unknown_dir: PathBuf::from("unknown_faces"),
            dispatch_max_in_flight: 32,
            pipeline: PipelineConfig::default(),
            supabase: SupabaseConfig::default(),
        }
    }
}

impl Config {
    /// Load defaults, overlay `path` (if any), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay values from an environment lookup.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let p = &mut self.pipeline;
        set_parsed(&var, "FACEWATCH_FRAME_SKIP", &mut p.frame_skip);
        set_parsed(&var, "FACEWATCH_SIMILARITY_THRESHOLD", &mut p.similarity_threshold);
        set_parsed(&var, "FACEWATCH_UNKNOWN_COOLDOWN_SECS", &mut p.unknown_save_cooldown_secs);
        set_parsed(&var, "FACEWATCH_KNOWN_COOLDOWN_SECS", &mut p.known_log_cooldown_secs);
        set_parsed(&var, "FACEWATCH_MIN_DETECTION_SCORE", &mut p.min_detection_score);
        set_parsed(&var, "FACEWATCH_BLUR_THRESHOLD", &mut p.blur_threshold);
        set_parsed(&var, "FACEWATCH_MIN_EDGE_DISTANCE", &mut p.min_frame_edge_distance);

        if let Some(v) = var("FACEWATCH_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        set_parsed(&var, "FACEWATCH_CAPTURE_WIDTH", &mut self.capture_width);
        set_parsed(&var, "FACEWATCH_CAPTURE_HEIGHT", &mut self.capture_height);
        if let Some(v) = var("FACEWATCH_MIRROR") {
            self.mirror = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        if let Some(v) = var("FACEWATCH_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        set_parsed(&var, "FACEWATCH_DET_SIZE", &mut self.detector_input_size);
        if let Some(v) = var("FACEWATCH_FACES_DIR") {
            self.faces_dir = PathBuf::from(v);
        }
        if let Some(v) = var("FACEWATCH_UNKNOWN_DIR") {
            self.unknown_dir = PathBuf::from(v);
        }
        set_parsed(&var, "FACEWATCH_DISPATCH_MAX_IN_FLIGHT", &mut self.dispatch_max_in_flight);

        if let Some(v) = var("SUPABASE_URL") {
            self.supabase.url = Some(v);
        }
        if let Some(v) = var("SUPABASE_KEY") {
            self.supabase.key = Some(v);
        }
    }

    pub fn detector_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    pub fn recognizer_path(&self) -> PathBuf {
        self.model_dir.join(&self.recognizer_model)
    }
}

/// Replace `slot` with the parsed value of `key`; unparsable values are ignored.
fn set_parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = var(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable config value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.pipeline.frame_skip, 3);
        assert_eq!(c.pipeline.similarity_threshold, 0.45);
        assert_eq!(c.pipeline.min_frame_edge_distance, 30);
        assert_eq!(c.pipeline.crop_padding.bottom, 60);
        assert_eq!(c.detector_path(), PathBuf::from("models/det_500m.onnx"));
        assert!(c.supabase.credentials().is_none());
    }

    #[test]
    fn test_toml_overlay_keeps_defaults() {
        let c: Config = toml::from_str(
            r#"
            camera_device = "/dev/video4"

            [pipeline]
            frame_skip = 5
            blur_threshold = 120.0

            [pipeline.crop_padding]
            bottom = 80
            "#,
        )
        .unwrap();
        assert_eq!(c.camera_device, "/dev/video4");
        assert_eq!(c.pipeline.frame_skip, 5);
        assert_eq!(c.pipeline.blur_threshold, 120.0);
        assert_eq!(c.pipeline.crop_padding.bottom, 80);
        assert_eq!(c.pipeline.crop_padding.left, 30);
        assert_eq!(c.pipeline.similarity_threshold, 0.45);
        assert_eq!(c.capture_width, 1080);
    }

    #[test]
    fn test_env_overrides() {
        let mut c = Config::default();
        c.apply_env(env(&[
            ("FACEWATCH_SIMILARITY_THRESHOLD", "0.6"),
            ("FACEWATCH_FRAME_SKIP", "not-a-number"),
            ("FACEWATCH_MIRROR", "0"),
            ("FACEWATCH_FACES_DIR", "/srv/faces"),
        ]));
        assert_eq!(c.pipeline.similarity_threshold, 0.6);
        assert_eq!(c.pipeline.frame_skip, 3);
        assert!(!c.mirror);
        assert_eq!(c.faces_dir, PathBuf::from("/srv/faces"));
    }

    #[test]
    fn test_supabase_url_gets_scheme() {
        let mut c = Config::default();
        c.apply_env(env(&[("SUPABASE_URL", "abc.supabase.co/"), ("SUPABASE_KEY", "k")]));
        assert_eq!(
            c.supabase.credentials(),
            Some(("https://abc.supabase.co".to_string(), "k".to_string()))
        );
        assert_eq!(c.supabase.table(), "detections");
    }

    #[test]
    fn test_supabase_requires_both_values() {
        let mut c = Config::default();
        c.apply_env(env(&[("SUPABASE_URL", "http://localhost:54321")]));
        assert!(c.supabase.credentials().is_none());
    }
}
