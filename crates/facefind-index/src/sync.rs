//! Incremental refresh of the representation cache for one folder.

use crate::gallery::{self, GalleryError, GalleryFile};
use crate::store::{IndexStore, IndexedImage, StoreError};
use chrono::Utc;
use facefind_core::{
    load_rgb, AnalyzerError, FaceAnalyzer, FaceRepresentation, ImageError, ARCFACE_MODEL_VERSION,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error("index: {0}")]
    Store(#[from] StoreError),
    #[error("face analysis failed on {path}: {source}")]
    Analysis {
        path: PathBuf,
        #[source]
        source: AnalyzerError,
    },
}

/// Produces face representations for a photo on disk.
pub trait FaceSource {
    /// Version tag stored with every cached embedding.
    fn model_version(&self) -> &str;

    fn represent(&mut self, path: &Path) -> Result<Vec<FaceRepresentation>, SourceError>;
}

impl FaceSource for FaceAnalyzer {
    fn model_version(&self) -> &str {
        ARCFACE_MODEL_VERSION
    }

    fn represent(&mut self, path: &Path) -> Result<Vec<FaceRepresentation>, SourceError> {
        let image = load_rgb(path)?;
        Ok(FaceAnalyzer::represent(self, &image)?)
    }
}

/// What a refresh did, by file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSummary {
    pub added: usize,
    pub replaced: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl RefreshSummary {
    pub fn changed(&self) -> bool {
        self.added + self.replaced + self.removed > 0
    }
}

enum Action {
    Add,
    Replace,
}

/// Bring the cache for `root` in line with the files on disk.
///
/// Files that cannot be decoded are skipped and counted as failed; a model
/// failure aborts the refresh.
pub fn refresh<S: FaceSource>(
    store: &mut IndexStore,
    source: &mut S,
    root: &Path,
) -> Result<RefreshSummary, SyncError> {
    let root = gallery::resolve_root(root)?;
    let files = gallery::scan(&root)?;
    let mut cached: HashMap<PathBuf, IndexedImage> = store
        .images_under(&root)?
        .into_iter()
        .map(|img| (img.path.clone(), img))
        .collect();

    let mut summary = RefreshSummary::default();
    tracing::info!(root = %root.display(), files = files.len(), cached = cached.len(), "refreshing index");

    for file in &files {
        let previous = cached.remove(&file.path);

        let action = match &previous {
            None => Action::Add,
            Some(img) if img.model_version != source.model_version() => Action::Replace,
            Some(img) if img.size == file.size && img.modified_ns == file.modified_ns => {
                summary.unchanged += 1;
                continue;
            }
            Some(_) => Action::Replace,
        };

        let sha256 = match gallery::sha256_file(&file.path) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(path = %file.path.display(), error = %e, "could not read file");
                summary.failed += 1;
                continue;
            }
        };

        // Touched but identical content: keep the cached faces.
        if let (Action::Replace, Some(img)) = (&action, &previous) {
            if img.sha256 == sha256 && img.model_version == source.model_version() {
                store.touch_image(&file.path, file.size, file.modified_ns)?;
                summary.unchanged += 1;
                continue;
            }
        }

        let faces = match source.represent(&file.path) {
            Ok(faces) => faces,
            Err(SourceError::Image(e)) => {
                tracing::warn!(error = %e, "skipping undecodable image");
                summary.failed += 1;
                continue;
            }
            Err(SourceError::Analyzer(source)) => {
                return Err(SyncError::Analysis {
                    path: file.path.clone(),
                    source,
                });
            }
        };

        store.upsert_image(&indexed(file, sha256, source.model_version(), faces.len()), &faces)?;
        tracing::debug!(path = %file.path.display(), faces = faces.len(), "indexed image");

        match action {
            Action::Add => summary.added += 1,
            Action::Replace => summary.replaced += 1,
        }
    }

    // Whatever is left in the cache no longer exists on disk.
    for path in cached.keys() {
        if store.remove_image(path)? {
            tracing::debug!(path = %path.display(), "removed stale entry");
            summary.removed += 1;
        }
    }

    tracing::info!(
        added = summary.added,
        replaced = summary.replaced,
        removed = summary.removed,
        unchanged = summary.unchanged,
        failed = summary.failed,
        "index refreshed"
    );
    Ok(summary)
}

fn indexed(file: &GalleryFile, sha256: String, model_version: &str, face_count: usize) -> IndexedImage {
    IndexedImage {
        path: file.path.clone(),
        sha256,
        size: file.size,
        modified_ns: file.modified_ns,
        model_version: model_version.to_string(),
        indexed_at: Utc::now(),
        face_count,
    }
}
