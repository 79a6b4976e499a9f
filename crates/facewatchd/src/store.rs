//! Filesystem persistence for unknown-face crops.

use facewatch_core::UnknownFaceStore;
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Writes `Unknown_<local timestamp>_<score>.jpg` files into one directory.
pub struct FsUnknownStore {
    dir: PathBuf,
}

impl FsUnknownStore {
    /// Create the store, creating `dir` if needed.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn file_name(now: chrono::DateTime<chrono::Local>, score: f32) -> String {
    format!("Unknown_{}_{score:.3}.jpg", now.format("%Y%m%d_%H%M%S_%3f"))
}

impl UnknownFaceStore for FsUnknownStore {
    type Error = StoreError;

    fn save(&self, crop: &RgbImage, score: f32) -> Result<PathBuf, StoreError> {
        let path = self.dir.join(file_name(chrono::Local::now(), score));
        crop.save_with_format(&path, image::ImageFormat::Jpeg)
            .map_err(|source| StoreError::Write {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("facewatch-store-{name}-{}", std::process::id()))
    }

    #[test]
    fn test_file_name_format() {
        let t = chrono::Local
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .unwrap()
            + chrono::Duration::milliseconds(42);
        assert_eq!(file_name(t, 0.87654), "Unknown_20240309_140507_042_0.877.jpg");
    }

    #[test]
    fn test_save_writes_jpeg() {
        let dir = scratch("save");
        let store = FsUnknownStore::create(dir.join("nested")).unwrap();
        let crop = RgbImage::from_pixel(16, 16, image::Rgb([10, 200, 30]));
        let path = store.save(&crop, 0.9).unwrap();

        assert!(path.starts_with(store.dir()));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("Unknown_") && name.ends_with("_0.900.jpg"), "{name}");
        let back = image::open(&path).unwrap();
        assert_eq!((back.width(), back.height()), (16, 16));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_create_fails_under_a_file() {
        let dir = scratch("blocked");
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("plain");
        std::fs::write(&file, b"x").unwrap();

        assert!(matches!(
            FsUnknownStore::create(file.join("sub")),
            Err(StoreError::CreateDir { .. })
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
