//! One search: reference face → refreshed gallery index → ranked matches.

use anyhow::{Context, Result};
use facefind_core::{load_rgb, rank, DistanceMetric, FaceAnalyzer, FaceMatch, FaceRepresentation};
use facefind_index::{refresh, resolve_root, FaceSource, IndexStore, RefreshSummary};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Extracts the single face a search is made for.
pub trait ReferenceEncoder {
    fn encode_reference(&mut self, path: &Path) -> Result<FaceRepresentation>;
}

impl ReferenceEncoder for FaceAnalyzer {
    fn encode_reference(&mut self, path: &Path) -> Result<FaceRepresentation> {
        let image = load_rgb(path)?;
        self.reference_face(&image)
            .with_context(|| format!("could not use {} as reference", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub folder: PathBuf,
    pub reference: PathBuf,
    pub metric: DistanceMetric,
    pub threshold: f32,
    /// Keep only the best `top` matches.
    pub top: Option<usize>,
    /// Re-analyze new and changed files before matching.
    pub refresh: bool,
}

#[derive(Debug, Serialize)]
pub struct SearchOutcome {
    pub folder: PathBuf,
    pub reference: PathBuf,
    pub reference_face: facefind_core::BoundingBox,
    pub metric: DistanceMetric,
    pub threshold: f32,
    /// Number of cached faces compared against the reference.
    pub faces_compared: usize,
    #[serde(skip)]
    pub refresh: Option<RefreshSummary>,
    pub matches: Vec<FaceMatch>,
}

pub fn run<E>(engine: &mut E, store: &mut IndexStore, request: &SearchRequest) -> Result<SearchOutcome>
where
    E: ReferenceEncoder + FaceSource,
{
    let folder = resolve_root(&request.folder)?;
    let reference = engine.encode_reference(&request.reference)?;
    tracing::info!(
        confidence = reference.bbox.confidence,
        x = reference.bbox.x,
        y = reference.bbox.y,
        "reference face selected"
    );

    let summary = if request.refresh {
        Some(refresh(store, engine, &folder)?)
    } else {
        None
    };

    let gallery = store
        .faces_under(&folder)?
        .into_iter()
        .filter(|face| face.embedding.model_version.as_deref() == Some(engine.model_version()))
        .collect::<Vec<_>>();

    let mut matches = rank(&reference.embedding, &gallery, request.metric, request.threshold);
    if let Some(top) = request.top {
        matches.truncate(top);
    }

    tracing::info!(
        faces = gallery.len(),
        matches = matches.len(),
        metric = %request.metric,
        threshold = request.threshold,
        "search finished"
    );

    Ok(SearchOutcome {
        folder,
        reference: request.reference.clone(),
        reference_face: reference.bbox,
        metric: request.metric,
        threshold: request.threshold,
        faces_compared: gallery.len(),
        refresh: summary,
        matches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use facefind_core::{BoundingBox, Embedding};
    use facefind_index::SourceError;
    use std::fs;

    /// Files hold a comma-separated embedding; the reference is read the same way.
    struct TextEngine;

    fn parse(path: &Path) -> Vec<FaceRepresentation> {
        let text = fs::read_to_string(path).unwrap_or_default();
        if text.trim().is_empty() {
            return vec![];
        }
        let values = text.trim().split(',').map(|v| v.parse().unwrap()).collect();
        vec![FaceRepresentation {
            bbox: BoundingBox {
                x: 1.0, y: 1.0, width: 40.0, height: 40.0,
                confidence: 0.95, landmarks: None,
            },
            embedding: Embedding { values, model_version: Some("text".into()) },
        }]
    }

    impl FaceSource for TextEngine {
        fn model_version(&self) -> &str {
            "text"
        }

        fn represent(&mut self, path: &Path) -> Result<Vec<FaceRepresentation>, SourceError> {
            Ok(parse(path))
        }
    }

    impl ReferenceEncoder for TextEngine {
        fn encode_reference(&mut self, path: &Path) -> Result<FaceRepresentation> {
            parse(path)
                .into_iter()
                .next()
                .ok_or_else(|| anyhow::anyhow!("no face detected in the reference image"))
        }
    }

    fn gallery() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("me_beach.jpg"), "1,0,0").unwrap();
        fs::write(dir.path().join("me_party.jpg"), "0.9,0.2,0").unwrap();
        fs::write(dir.path().join("someone_else.jpg"), "0,1,0").unwrap();
        fs::write(dir.path().join("landscape.png"), "").unwrap();
        dir
    }

    fn request(folder: &Path, reference: &Path) -> SearchRequest {
        SearchRequest {
            folder: folder.to_path_buf(),
            reference: reference.to_path_buf(),
            metric: DistanceMetric::Cosine,
            threshold: DistanceMetric::Cosine.default_threshold(),
            top: None,
            refresh: true,
        }
    }

    #[test]
    fn test_search_finds_matching_photos_in_order() {
        let dir = gallery();
        let refs = tempfile::tempdir().unwrap();
        let reference = refs.path().join("uploaded_reference.jpg");
        fs::write(&reference, "1,0,0").unwrap();

        let mut store = IndexStore::open_in_memory().unwrap();
        let outcome = run(&mut TextEngine, &mut store, &request(dir.path(), &reference)).unwrap();

        let names: Vec<_> = outcome
            .matches
            .iter()
            .map(|m| m.path.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["me_beach.jpg", "me_party.jpg"]);
        assert_eq!(outcome.faces_compared, 3);
        assert_eq!(outcome.refresh.unwrap().added, 4);
    }

    #[test]
    fn test_search_top_limits_results() {
        let dir = gallery();
        let reference = dir.path().join("me_beach.jpg");
        let mut store = IndexStore::open_in_memory().unwrap();

        let mut req = request(dir.path(), &reference);
        req.top = Some(1);
        let outcome = run(&mut TextEngine, &mut store, &req).unwrap();
        assert_eq!(outcome.matches.len(), 1);
    }

    #[test]
    fn test_search_without_refresh_uses_cache_only() {
        let dir = gallery();
        let reference = dir.path().join("me_beach.jpg");
        let mut store = IndexStore::open_in_memory().unwrap();

        let mut req = request(dir.path(), &reference);
        req.refresh = false;
        let outcome = run(&mut TextEngine, &mut store, &req).unwrap();
        assert!(outcome.matches.is_empty());
        assert!(outcome.refresh.is_none());
    }

    #[test]
    fn test_search_reference_without_face_fails() {
        let dir = gallery();
        let reference = dir.path().join("landscape.png");
        let mut store = IndexStore::open_in_memory().unwrap();

        let err = run(&mut TextEngine, &mut store, &request(dir.path(), &reference)).unwrap_err();
        assert!(err.to_string().contains("no face"));
    }

    #[test]
    fn test_search_missing_folder() {
        let refs = tempfile::tempdir().unwrap();
        let reference = refs.path().join("r.jpg");
        fs::write(&reference, "1,0,0").unwrap();
        let mut store = IndexStore::open_in_memory().unwrap();

        let err = run(&mut TextEngine, &mut store, &request(Path::new("/no/such/folder"), &reference))
            .unwrap_err();
        assert!(err.to_string().contains("folder does not exist"));
    }
}
