use std::path::Path;

use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView};
use ort::session::Session;

use crate::face::{self, Detection, Embedding, RECOGNIZER_INPUT_SIZE};

/// Full pipeline: detect faces → align → encode
pub struct Pipeline {
    pub detector: Session,
    pub encoder: Session,
}

impl Pipeline {
    pub fn new(detector_model: &Path, recognizer_model: &Path) -> Result<Self> {
        Ok(Self {
            detector: crate::model::detector_session(detector_model)?,
            encoder: crate::model::recog_session(recognizer_model)?,
        })
    }

    /// Process an image: detect best face and return embedding
    pub fn process_image(
        &mut self,
        img: &DynamicImage,
        score_threshold: f32,
        nms_threshold: f32,
    ) -> Result<(Detection, Embedding)> {
        let detections =
            face::detect_faces(&mut self.detector, img, score_threshold, nms_threshold)
                .context("detecting faces")?;

        let best = detections
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .ok_or_else(|| anyhow::anyhow!("No face detected in image"))?;

        let embedding = self.encode(img, &best)?;
        Ok((best, embedding))
    }

    /// Detect every face in the image and encode each of them.
    ///
    /// Faces that fail to align or encode are logged and left out.
    pub fn recognize_all(
        &mut self,
        img: &DynamicImage,
        score_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Vec<(Detection, Embedding)>> {
        self.recognize_scaled(img, 1.0, score_threshold, nms_threshold)
    }

    /// Like [`Pipeline::recognize_all`] but runs detection on a copy of the
    /// image shrunk by `scale`. Detections are reported in full-resolution
    /// coordinates and faces are cropped from the full-resolution image.
    pub fn recognize_scaled(
        &mut self,
        img: &DynamicImage,
        scale: f32,
        score_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Vec<(Detection, Embedding)>> {
        if !(scale > 0.0 && scale <= 1.0) {
            anyhow::bail!("detection scale must be in (0, 1], got {}", scale);
        }

        let detections = if scale < 1.0 {
            let (w, h) = img.dimensions();
            let small_w = ((w as f32 * scale).round() as u32).max(1);
            let small_h = ((h as f32 * scale).round() as u32).max(1);
            let small = img.resize_exact(small_w, small_h, image::imageops::FilterType::Triangle);
            let back_x = w as f32 / small_w as f32;
            let back_y = h as f32 / small_h as f32;
            face::detect_faces(&mut self.detector, &small, score_threshold, nms_threshold)
                .context("detecting faces")?
                .into_iter()
                .map(|d| d.scaled((back_x + back_y) / 2.0))
                .collect()
        } else {
            face::detect_faces(&mut self.detector, img, score_threshold, nms_threshold)
                .context("detecting faces")?
        };

        let mut faces = Vec::with_capacity(detections.len());
        for detection in detections {
            match self.encode(img, &detection) {
                Ok(embedding) => faces.push((detection, embedding)),
                Err(e) => log::warn!("skipping face at {:?}: {:#}", detection.bbox, e),
            }
        }
        Ok(faces)
    }

    fn encode(&mut self, img: &DynamicImage, detection: &Detection) -> Result<Embedding> {
        let face_img =
            face::align_face(img, detection, RECOGNIZER_INPUT_SIZE).context("aligning face")?;
        face::encode_face(&mut self.encoder, &face_img).context("encoding face")
    }
}
