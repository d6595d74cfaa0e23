//! Acquiring the reference photo: an existing file, or a fresh camera capture.

use crate::config::Config;
use anyhow::{bail, Context, Result};
use facefind_core::{image_io::SUPPORTED_EXTENSIONS, is_supported_image};
use facefind_hw::Camera;
use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use tempfile::TempPath;

/// Where the reference face comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceSource {
    Upload(PathBuf),
    Camera,
}

/// A reference photo on disk. A capture written to a temporary file is
/// deleted when this value is dropped.
#[derive(Debug)]
pub struct Reference {
    pub path: PathBuf,
    temp: Option<TempPath>,
}

impl Reference {
    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }
}

pub fn acquire(source: &ReferenceSource, config: &Config, save_to: Option<&Path>) -> Result<Reference> {
    match source {
        ReferenceSource::Upload(path) => {
            let path = validate_upload(path)?;
            tracing::info!(path = %path.display(), "using uploaded reference image");
            Ok(Reference { path, temp: None })
        }
        ReferenceSource::Camera => {
            let image = capture(config)?;
            store_capture(&image, save_to)
        }
    }
}

fn validate_upload(path: &Path) -> Result<PathBuf> {
    if !path.is_file() {
        bail!("reference image not found: {}", path.display());
    }
    if !is_supported_image(path) {
        bail!(
            "unsupported reference image {} (expected one of: {})",
            path.display(),
            SUPPORTED_EXTENSIONS.join(", ")
        );
    }
    Ok(path.to_path_buf())
}

/// Take one still from the configured camera.
pub fn capture(config: &Config) -> Result<RgbImage> {
    let camera = Camera::open(&config.camera_device)
        .with_context(|| format!("could not open camera {}", config.camera_device))?;
    tracing::info!(
        device = %camera.device_path,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        "camera opened"
    );

    let frame = camera.capture_still(config.warmup_frames)?;
    Ok(frame.into_image()?)
}

/// Write a captured image as JPEG, either to `save_to` or to a temporary file.
pub fn store_capture(image: &RgbImage, save_to: Option<&Path>) -> Result<Reference> {
    let reference = match save_to {
        Some(path) => Reference {
            path: path.to_path_buf(),
            temp: None,
        },
        None => {
            let temp = tempfile::Builder::new()
                .prefix("facefind-reference-")
                .suffix(".jpg")
                .tempfile()
                .context("could not create temporary file for the captured reference")?
                .into_temp_path();
            Reference {
                path: temp.to_path_buf(),
                temp: Some(temp),
            }
        }
    };

    image
        .save_with_format(&reference.path, ImageFormat::Jpeg)
        .with_context(|| format!("could not write captured reference to {}", reference.path.display()))?;
    tracing::info!(path = %reference.path.display(), "reference image captured");
    Ok(reference)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_accepts_supported_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("me.JPG");
        std::fs::write(&path, b"x").unwrap();

        let reference = acquire(&ReferenceSource::Upload(path.clone()), &Config::default(), None).unwrap();
        assert_eq!(reference.path, path);
        assert!(!reference.is_temporary());
    }

    #[test]
    fn test_upload_rejects_missing_and_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let gif = dir.path().join("me.gif");
        std::fs::write(&gif, b"x").unwrap();

        let cfg = Config::default();
        let missing = acquire(&ReferenceSource::Upload(dir.path().join("nope.jpg")), &cfg, None);
        assert!(missing.unwrap_err().to_string().contains("not found"));
        let unsupported = acquire(&ReferenceSource::Upload(gif), &cfg, None);
        assert!(unsupported.unwrap_err().to_string().contains("unsupported"));
        // A directory is not a reference image.
        assert!(acquire(&ReferenceSource::Upload(dir.path().to_path_buf()), &cfg, None).is_err());
    }

    #[test]
    fn test_store_capture_temp_file_is_removed_on_drop() {
        let image = RgbImage::from_pixel(16, 16, image::Rgb([90, 120, 150]));
        let reference = store_capture(&image, None).unwrap();
        let path = reference.path.clone();

        assert!(reference.is_temporary());
        assert_eq!(facefind_core::load_rgb(&path).unwrap().dimensions(), (16, 16));
        drop(reference);
        assert!(!path.exists());
    }

    #[test]
    fn test_store_capture_to_explicit_path_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("captured_reference.jpg");
        let image = RgbImage::from_pixel(8, 8, image::Rgb([10, 10, 10]));

        let reference = store_capture(&image, Some(&target)).unwrap();
        drop(reference);
        assert!(target.exists());
    }
}
