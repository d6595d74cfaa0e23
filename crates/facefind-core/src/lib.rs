//! facefind-core — Face detection, recognition and matching engine.
//!
//! Uses SCRFD for face detection and ArcFace for face recognition,
//! both running via ONNX Runtime for CPU inference.

pub mod alignment;
pub mod analyzer;
pub mod detector;
pub mod image_io;
pub mod matcher;
pub mod recognizer;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer};
pub use detector::{DetectorOptions, FaceDetector};
pub use image_io::{is_supported_image, load_rgb, ImageError};
pub use matcher::{rank, DistanceMetric, FaceMatch, GalleryFace};
pub use recognizer::{FaceRecognizer, ARCFACE_MODEL_VERSION};
pub use types::{BoundingBox, Embedding, FaceRepresentation};

use std::path::PathBuf;

/// Default directory holding `det_10g.onnx` and `w600k_r50.onnx`:
/// `$XDG_DATA_HOME/facefind/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    data_dir().join("models")
}

/// Per-user data directory for facefind.
pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facefind")
}
