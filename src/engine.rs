use anyhow::Result;
use image::{DynamicImage, GenericImageView, RgbImage};

use crate::config::DetectionSettings;
use crate::gallery::Gallery;
use crate::matcher::{self, Match};
use crate::overlay::Recognition;
use crate::palette;
use crate::{Detection, Embedding, Pipeline};

/// Anything that can find and encode the faces in an image.
pub trait FaceEngine {
    fn faces(
        &mut self,
        img: &DynamicImage,
        settings: &DetectionSettings,
    ) -> Result<Vec<(Detection, Embedding)>>;
}

impl FaceEngine for Pipeline {
    fn faces(
        &mut self,
        img: &DynamicImage,
        settings: &DetectionSettings,
    ) -> Result<Vec<(Detection, Embedding)>> {
        self.recognize_scaled(
            img,
            settings.scale,
            settings.score_threshold,
            settings.nms_threshold,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognitionSettings {
    pub detection: DetectionSettings,
    pub tolerance: f32,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            detection: DetectionSettings::default(),
            tolerance: matcher::DEFAULT_TOLERANCE,
        }
    }
}

/// Detect, encode and identify every face in `frame`.
pub fn recognize_frame<E: FaceEngine + ?Sized>(
    engine: &mut E,
    frame: &RgbImage,
    gallery: &Gallery,
    settings: &RecognitionSettings,
) -> Result<Vec<Recognition>> {
    let img = DynamicImage::ImageRgb8(frame.clone());
    let (width, height) = img.dimensions();

    let faces = engine.faces(&img, &settings.detection)?;
    let recognitions = faces
        .into_iter()
        .map(|(detection, embedding)| {
            let bbox = detection.bounding_box(width, height);
            match matcher::best_match(gallery, &embedding, settings.tolerance) {
                Match::Known {
                    index, distance, ..
                } => {
                    let known = &gallery.faces()[index];
                    Recognition {
                        bbox,
                        label: known.name.clone(),
                        color: known.color,
                        distance: Some(distance),
                    }
                }
                Match::Unknown { nearest } => Recognition {
                    bbox,
                    label: "Unknown".to_string(),
                    color: palette::UNKNOWN,
                    distance: nearest,
                },
            }
        })
        .collect();
    Ok(recognitions)
}
