use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::Config;
use crate::engine::{self, FaceEngine};
use crate::gallery::Gallery;
use crate::overlay::{self, Recognition};
use crate::Pipeline;

/// `photo.jpg` → `photo_annotated.png`, next to the input.
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frame".to_string());
    input.with_file_name(format!("{}_annotated.png", stem))
}

/// Recognize the faces in `input` and write the annotated image to `output`.
pub fn annotate_file<E: FaceEngine + ?Sized>(
    engine: &mut E,
    gallery: &Gallery,
    cfg: &Config,
    input: &Path,
    output: &Path,
) -> Result<Vec<Recognition>> {
    let mut frame = image::open(input)
        .with_context(|| format!("reading {}", input.display()))?
        .to_rgb8();
    let recognitions = engine::recognize_frame(engine, &frame, gallery, &cfg.recognition())?;

    let font = overlay::load_font(cfg.font.as_deref());
    overlay::draw(&mut frame, &recognitions, font.as_ref());
    frame
        .save(output)
        .with_context(|| format!("writing {}", output.display()))?;
    Ok(recognitions)
}

/// Still-image counterpart of the live loop.
pub fn run(cfg: &Config, input: &Path, output: Option<&Path>) -> Result<()> {
    cfg.validate()?;
    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_output_path(input));

    let mut pipeline = Pipeline::new(&cfg.detector_model, &cfg.recognizer_model)
        .context("Failed to initialize face recognition pipeline")?;
    let gallery = Gallery::load(
        &cfg.faces_dir,
        &mut pipeline,
        &cfg.detection(),
        cfg.color_mode,
    )?;

    let recognitions = annotate_file(&mut pipeline, &gallery, cfg, input, &output)?;
    for rec in &recognitions {
        match rec.distance {
            Some(d) => log::info!("{} (distance {:.3})", rec.label, d),
            None => log::info!("{}", rec.label),
        }
    }
    log::info!(
        "{} face(s) annotated, written to {}",
        recognitions.len(),
        output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{detection_at, FixedEngine};
    use crate::Embedding;
    use image::RgbImage;

    #[test]
    fn output_path_sits_next_to_input() {
        assert_eq!(
            default_output_path(Path::new("/tmp/shots/group.jpg")),
            PathBuf::from("/tmp/shots/group_annotated.png")
        );
    }

    #[test]
    fn writes_annotated_copy() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        let output = dir.path().join("out.png");
        RgbImage::new(32, 32).save(&input).unwrap();

        let mut engine = FixedEngine {
            faces: vec![(
                detection_at(4.0, 4.0, 20.0),
                Embedding::from_vec(vec![1.0]),
            )],
            calls: 0,
        };
        let cfg = Config {
            font: Some(dir.path().join("missing.ttf")),
            ..Config::default()
        };
        let recs =
            annotate_file(&mut engine, &Gallery::default(), &cfg, &input, &output).unwrap();
        assert_eq!(recs.len(), 1);

        let written = image::open(&output).unwrap().to_rgb8();
        assert_eq!(*written.get_pixel(4, 10), crate::palette::UNKNOWN);
    }
}
