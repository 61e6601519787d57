use std::path::Path;

use anyhow::{Context, Result};
use ort::{
    ep::{self, ExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
};

/// File names of the models as published in the OpenCV model zoo.
pub const DETECTOR_MODEL_FILE: &str = "face_detection_yunet_2023mar.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "face_recognition_sface_2021dec.onnx";

pub fn session_builder() -> Result<SessionBuilder> {
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

fn load_session(path: &Path, what: &str) -> Result<Session> {
    if !path.exists() {
        anyhow::bail!("{} model not found at {}", what, path.display());
    }
    log::debug!("loading {} model from {}", what, path.display());
    session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("load {} model {}", what, path.display()))
}

pub fn recog_session(path: &Path) -> Result<Session> {
    load_session(path, "recognition")
}

pub fn detector_session(path: &Path) -> Result<Session> {
    load_session(path, "detector")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_is_reported_with_path() {
        let err = detector_session(Path::new("/nonexistent/yunet.onnx"))
            .err()
            .expect("missing model must fail");
        let msg = format!("{err:#}");
        assert!(msg.contains("detector model not found"));
        assert!(msg.contains("/nonexistent/yunet.onnx"));
    }
}
