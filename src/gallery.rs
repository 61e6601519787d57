//! Reference faces loaded from a directory of images.
//!
//! Every `*.jpg`, `*.jpeg` or `*.png` file (any case) contributes one
//! identity named after the file stem, so `image_recognition/alice.jpg`
//! becomes `alice`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::Rgb;
use serde::Serialize;
use thiserror::Error;

use crate::config::{ColorMode, DetectionSettings};
use crate::engine::FaceEngine;
use crate::palette;
use crate::Embedding;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("known faces directory '{}' not found", .0.display())]
    MissingDir(PathBuf),
    #[error("'{}' is not a directory", .0.display())]
    NotADirectory(PathBuf),
}

#[derive(Debug, Clone)]
pub struct KnownFace {
    pub name: String,
    pub embedding: Embedding,
    pub color: Rgb<u8>,
}

/// Summary of a known face for listing.
#[derive(Debug, Clone, Serialize)]
pub struct GalleryEntry {
    pub name: String,
    pub color: [u8; 3],
    pub dimensions: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Gallery {
    faces: Vec<KnownFace>,
}

impl Gallery {
    pub fn from_faces(faces: Vec<KnownFace>) -> Self {
        Self { faces }
    }

    /// Encode every reference image in `dir`.
    ///
    /// Files that cannot be decoded or encoded, or contain no face, are
    /// skipped with a warning. A missing directory is an error.
    pub fn load<E: FaceEngine + ?Sized>(
        dir: &Path,
        engine: &mut E,
        settings: &DetectionSettings,
        colors: ColorMode,
    ) -> Result<Self> {
        if !dir.exists() {
            return Err(GalleryError::MissingDir(dir.to_path_buf()).into());
        }
        if !dir.is_dir() {
            return Err(GalleryError::NotADirectory(dir.to_path_buf()).into());
        }

        // reference photos are small, always detect at full resolution
        let settings = DetectionSettings {
            scale: 1.0,
            ..*settings
        };

        let mut faces = Vec::new();
        for path in image_files(dir)? {
            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let img = match image::open(&path) {
                Ok(img) => img,
                Err(e) => {
                    log::warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            let found = match engine.faces(&img, &settings) {
                Ok(found) => found,
                Err(e) => {
                    log::warn!("Skipping {}: {:#}", path.display(), e);
                    continue;
                }
            };
            let best = found
                .into_iter()
                .max_by(|(a, _), (b, _)| a.score.total_cmp(&b.score));
            match best {
                Some((_, embedding)) if !embedding.values().all(f32::is_finite) => {
                    log::warn!("Skipping {}: embedding is not finite", path.display());
                }
                Some((detection, embedding)) => {
                    log::info!(
                        "Loaded {} from {} (score {:.3})",
                        name,
                        path.display(),
                        detection.score
                    );
                    let color = palette::identity_color(&name, colors);
                    faces.push(KnownFace {
                        name,
                        embedding,
                        color,
                    });
                }
                None => log::warn!("No face found in {}", path.display()),
            }
        }

        if faces.is_empty() {
            log::warn!(
                "No known faces loaded from {}, everyone will be Unknown",
                dir.display()
            );
        }
        Ok(Self { faces })
    }

    pub fn faces(&self) -> &[KnownFace] {
        &self.faces
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn entries(&self) -> Vec<GalleryEntry> {
        self.faces
            .iter()
            .map(|f| GalleryEntry {
                name: f.name.clone(),
                color: f.color.0,
                dimensions: f.embedding.len(),
            })
            .collect()
    }
}

/// Reference image files directly inside `dir`, sorted by file name.
pub fn image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("reading directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && is_image_file(&path) {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}
