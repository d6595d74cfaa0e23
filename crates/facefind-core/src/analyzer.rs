//! Detector + recognizer pair loaded from one model directory.

use crate::detector::{DetectorError, DetectorOptions, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::FaceRepresentation;
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("no face detected in the reference image")]
    NoFaceDetected,
}

/// Paths of the two ONNX models inside a model directory.
pub fn model_paths(model_dir: &Path) -> (PathBuf, PathBuf) {
    (model_dir.join(SCRFD_MODEL_FILE), model_dir.join(ARCFACE_MODEL_FILE))
}

pub struct FaceAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl FaceAnalyzer {
    /// Load both models. Fails fast if either file is missing.
    pub fn load(model_dir: &Path, options: DetectorOptions) -> Result<Self, AnalyzerError> {
        let (scrfd, arcface) = model_paths(model_dir);
        let detector = FaceDetector::load(&scrfd, options)?;
        let recognizer = FaceRecognizer::load(&arcface)?;
        Ok(Self { detector, recognizer })
    }

    /// Detect every face in the image and extract its embedding.
    ///
    /// Faces without landmarks cannot be aligned and are skipped.
    pub fn represent(&mut self, image: &RgbImage) -> Result<Vec<FaceRepresentation>, AnalyzerError> {
        let faces = self.detector.detect(image)?;
        let mut out = Vec::with_capacity(faces.len());

        for bbox in faces {
            match self.recognizer.extract(image, &bbox) {
                Ok(embedding) => out.push(FaceRepresentation { bbox, embedding }),
                Err(RecognizerError::NoLandmarks) => {
                    tracing::debug!(confidence = bbox.confidence, "skipping face without landmarks");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(out)
    }

    /// Representation of the most confident face in a reference photo.
    ///
    /// A reference without any detectable face is an error.
    pub fn reference_face(&mut self, image: &RgbImage) -> Result<FaceRepresentation, AnalyzerError> {
        let mut faces = self.represent(image)?;
        if faces.len() > 1 {
            tracing::warn!(
                faces = faces.len(),
                "reference image contains several faces; using the most confident one"
            );
        }
        // represent() keeps detector order: confidence descending.
        if faces.is_empty() {
            return Err(AnalyzerError::NoFaceDetected);
        }
        Ok(faces.swap_remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_paths() {
        let (det, rec) = model_paths(Path::new("/opt/models"));
        assert_eq!(det, PathBuf::from("/opt/models/det_10g.onnx"));
        assert_eq!(rec, PathBuf::from("/opt/models/w600k_r50.onnx"));
    }

    #[test]
    fn test_load_missing_models() {
        let dir = tempfile::tempdir().unwrap();
        let err = FaceAnalyzer::load(dir.path(), DetectorOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, AnalyzerError::Detector(DetectorError::ModelNotFound(_))));
    }
}
