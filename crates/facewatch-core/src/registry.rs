//! Identity registry: one averaged reference embedding per known person.
//!
//! Built once at startup and read-only afterwards. The reference matrix
//! and its row norms are derived together and never updated in place.

use crate::analyzer::FaceAnalyzer;
use crate::types::Rgb;
use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("failed to read enrollment directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A known person.
#[derive(Debug, Clone)]
pub struct Identity {
    pub name: String,
    pub reference: Vec<f32>,
    pub color: Rgb,
    /// Number of enrollment samples averaged into `reference`.
    pub samples: usize,
}

/// Read-only identity set plus the matrix/norm cache used by the matcher.
#[derive(Debug, Clone)]
pub struct Registry {
    identities: Vec<Identity>,
    /// Row `i` is the reference embedding of `identities[i]`.
    embeddings: Array2<f32>,
    /// L2 norm of each row of `embeddings`.
    norms: Array1<f32>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::empty()
    }
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            identities: Vec::new(),
            embeddings: Array2::zeros((0, 0)),
            norms: Array1::zeros(0),
        }
    }

    /// Build from in-memory enrollment groups, in the given order.
    ///
    /// Each group's usable embeddings are averaged component-wise. The first
    /// accepted embedding fixes the dimension; embeddings of any other
    /// dimension (or empty ones) are skipped. Groups left with no usable
    /// embedding produce no identity.
    pub fn from_groups<I, N>(groups: I) -> Self
    where
        I: IntoIterator<Item = (N, Vec<Vec<f32>>)>,
        N: Into<String>,
    {
        let mut rng = rand::thread_rng();
        let mut dim: Option<usize> = None;
        let mut identities = Vec::new();

        for (name, embeddings) in groups {
            let name = name.into();
            let mut sum: Vec<f64> = Vec::new();
            let mut samples = 0usize;

            for emb in embeddings {
                if emb.is_empty() {
                    tracing::warn!(name = %name, "skipping empty enrollment embedding");
                    continue;
                }
                let expected = *dim.get_or_insert(emb.len());
                if emb.len() != expected {
                    tracing::warn!(
                        name = %name,
                        expected,
                        got = emb.len(),
                        "skipping enrollment embedding with mismatched dimension"
                    );
                    continue;
                }
                if sum.is_empty() {
                    sum = vec![0.0; expected];
                }
                for (acc, v) in sum.iter_mut().zip(&emb) {
                    *acc += *v as f64;
                }
                samples += 1;
            }

            if samples == 0 {
                tracing::debug!(name = %name, "no usable enrollment samples; identity omitted");
                continue;
            }

            let reference = sum.iter().map(|s| (s / samples as f64) as f32).collect();
            let color = [
                rng.gen_range(180..=255),
                rng.gen_range(180..=255),
                rng.gen_range(180..=255),
            ];
            identities.push(Identity {
                name,
                reference,
                color,
                samples,
            });
        }

        Self::from_identities(identities)
    }

    fn from_identities(identities: Vec<Identity>) -> Self {
        let dim = identities.first().map_or(0, |i| i.reference.len());
        let mut embeddings = Array2::<f32>::zeros((identities.len(), dim));
        for (mut row, identity) in embeddings.axis_iter_mut(Axis(0)).zip(&identities) {
            row.assign(&Array1::from(identity.reference.clone()));
        }
        let norms = embeddings.map_axis(Axis(1), |row| row.dot(&row).sqrt());

        Self {
            identities,
            embeddings,
            norms,
        }
    }

    /// Build from an enrollment tree of `root/<name>/<image>` files.
    ///
    /// Person folders are visited in lexicographic order. Every file in a
    /// person folder is tried as an image; for each one that decodes, the
    /// first face the analyzer reports contributes its embedding. Unreadable
    /// person folders, undecodable files and faceless images are skipped.
    /// A missing root yields an empty registry; only a root that exists but
    /// cannot be listed is an error.
    pub fn build<A: FaceAnalyzer + ?Sized>(
        root: &Path,
        analyzer: &mut A,
    ) -> Result<Self, RegistryError> {
        if !root.is_dir() {
            tracing::warn!(path = %root.display(), "enrollment directory missing; no identities loaded");
            return Ok(Self::empty());
        }

        let person_dirs: Vec<PathBuf> = sorted_entries(root)?
            .into_iter()
            .filter(|p| p.is_dir())
            .collect();
        let registry = Self::from_person_dirs(&person_dirs, analyzer);
        tracing::info!(
            identities = registry.len(),
            dim = registry.dim(),
            "identity registry built"
        );
        Ok(registry)
    }

    fn from_person_dirs<A: FaceAnalyzer + ?Sized>(person_dirs: &[PathBuf], analyzer: &mut A) -> Self {
        let mut groups = Vec::new();
        for person_dir in person_dirs {
            let Some(name) = person_dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let files = match sorted_entries(person_dir) {
                Ok(files) => files,
                Err(e) => {
                    tracing::warn!(name, error = %e, "skipping unreadable enrollment folder");
                    continue;
                }
            };

            let mut embeddings = Vec::new();
            for image_path in files.iter().filter(|p| p.is_file()) {
                let image = match decode_image(image_path) {
                    Ok(img) => img,
                    Err(e) => {
                        tracing::debug!(path = %image_path.display(), error = %e, "unreadable enrollment image");
                        continue;
                    }
                };
                match analyzer.analyze(&image) {
                    Ok(faces) => match faces.into_iter().next() {
                        Some(face) => embeddings.push(face.embedding),
                        None => {
                            tracing::debug!(path = %image_path.display(), "no face in enrollment image")
                        }
                    },
                    Err(e) => {
                        tracing::warn!(path = %image_path.display(), error = %e, "enrollment analysis failed")
                    }
                }
            }
            groups.push((name.to_string(), embeddings));
        }
        Self::from_groups(groups)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Embedding dimension D (0 when empty).
    pub fn dim(&self) -> usize {
        self.embeddings.ncols()
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn identity(&self, index: usize) -> Option<&Identity> {
        self.identities.get(index)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.identities.iter().map(|i| i.name.as_str())
    }

    pub fn embeddings(&self) -> &Array2<f32> {
        &self.embeddings
    }

    pub fn norms(&self) -> &Array1<f32> {
        &self.norms
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, RegistryError> {
    let read = std::fs::read_dir(dir).map_err(|source| RegistryError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths: Vec<PathBuf> = read.filter_map(|e| e.ok().map(|e| e.path())).collect();
    paths.sort();
    Ok(paths)
}

/// Decode by content, not extension.
fn decode_image(path: &Path) -> image::ImageResult<image::RgbImage> {
    Ok(image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?
        .to_rgb8())
}
