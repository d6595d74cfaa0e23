//! Distance metrics and ranking of gallery faces against a reference face.

use crate::types::{BoundingBox, Embedding};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// ArcFace (w600k_r50) verification thresholds.
const ARCFACE_COSINE_THRESHOLD: f32 = 0.68;
const ARCFACE_EUCLIDEAN_L2_THRESHOLD: f32 = 1.13;

/// How two embeddings are compared. Lower distance = more similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// `1 - cosine_similarity`, in [0, 2].
    #[default]
    Cosine,
    /// Euclidean distance between L2-normalized vectors, in [0, 2].
    EuclideanL2,
}

impl DistanceMetric {
    pub fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - a.similarity(b),
            DistanceMetric::EuclideanL2 => a.l2_normalized().euclidean_distance(&b.l2_normalized()),
        }
    }

    /// Distance at or below which two ArcFace embeddings are the same person.
    pub fn default_threshold(&self) -> f32 {
        match self {
            DistanceMetric::Cosine => ARCFACE_COSINE_THRESHOLD,
            DistanceMetric::EuclideanL2 => ARCFACE_EUCLIDEAN_L2_THRESHOLD,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::EuclideanL2 => "euclidean_l2",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean_l2" | "l2" => Ok(DistanceMetric::EuclideanL2),
            other => Err(format!(
                "unknown distance metric '{other}' (expected cosine or euclidean_l2)"
            )),
        }
    }
}

/// A face stored for some gallery image.
#[derive(Debug, Clone)]
pub struct GalleryFace {
    pub path: PathBuf,
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// A gallery image whose best face is within the threshold of the reference.
#[derive(Debug, Clone, Serialize)]
pub struct FaceMatch {
    pub path: PathBuf,
    pub distance: f32,
    pub threshold: f32,
    pub metric: DistanceMetric,
    pub face: BoundingBox,
}

/// Rank gallery faces against `probe`.
///
/// Faces farther than `threshold` are dropped. An image with several matching
/// faces is reported once, with its closest face. Results are ordered by
/// ascending distance, then by path.
pub fn rank(
    probe: &Embedding,
    gallery: &[GalleryFace],
    metric: DistanceMetric,
    threshold: f32,
) -> Vec<FaceMatch> {
    let mut best: HashMap<&PathBuf, FaceMatch> = HashMap::new();

    for face in gallery {
        let distance = metric.distance(probe, &face.embedding);
        if !distance.is_finite() || distance > threshold {
            continue;
        }

        let is_better = best
            .get(&face.path)
            .map_or(true, |prev| distance < prev.distance);
        if is_better {
            best.insert(
                &face.path,
                FaceMatch {
                    path: face.path.clone(),
                    distance,
                    threshold,
                    metric,
                    face: face.bbox.clone(),
                },
            );
        }
    }

    let mut matches: Vec<FaceMatch> = best.into_values().collect();
    matches.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
    });
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding { values: values.to_vec(), model_version: None }
    }

    fn face(path: &str, values: &[f32]) -> GalleryFace {
        GalleryFace {
            path: PathBuf::from(path),
            bbox: BoundingBox {
                x: 0.0, y: 0.0, width: 10.0, height: 10.0,
                confidence: 0.9, landmarks: None,
            },
            embedding: emb(values),
        }
    }

    #[test]
    fn test_cosine_distance() {
        let m = DistanceMetric::Cosine;
        assert!(m.distance(&emb(&[1.0, 0.0]), &emb(&[2.0, 0.0])).abs() < 1e-6);
        assert!((m.distance(&emb(&[1.0, 0.0]), &emb(&[0.0, 1.0])) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_l2_ignores_magnitude() {
        let m = DistanceMetric::EuclideanL2;
        assert!(m.distance(&emb(&[1.0, 0.0]), &emb(&[5.0, 0.0])).abs() < 1e-6);
        let d = m.distance(&emb(&[1.0, 0.0]), &emb(&[0.0, 3.0]));
        assert!((d - 2.0f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_metric_from_str() {
        assert_eq!("cosine".parse::<DistanceMetric>(), Ok(DistanceMetric::Cosine));
        assert_eq!("Euclidean-L2".parse::<DistanceMetric>(), Ok(DistanceMetric::EuclideanL2));
        assert!("manhattan".parse::<DistanceMetric>().is_err());
    }

    #[test]
    fn test_rank_filters_and_sorts() {
        let probe = emb(&[1.0, 0.0, 0.0]);
        let gallery = vec![
            face("/p/far.jpg", &[0.0, 1.0, 0.0]),
            face("/p/close.jpg", &[0.9, 0.1, 0.0]),
            face("/p/exact.jpg", &[1.0, 0.0, 0.0]),
        ];

        let matches = rank(&probe, &gallery, DistanceMetric::Cosine, 0.68);
        let paths: Vec<_> = matches.iter().map(|m| m.path.to_str().unwrap()).collect();
        assert_eq!(paths, vec!["/p/exact.jpg", "/p/close.jpg"]);
        assert!(matches[0].distance <= matches[1].distance);
        assert_eq!(matches[0].threshold, 0.68);
    }

    #[test]
    fn test_rank_keeps_best_face_per_image() {
        let probe = emb(&[1.0, 0.0]);
        let gallery = vec![
            face("/p/group.jpg", &[0.8, 0.2]),
            face("/p/group.jpg", &[1.0, 0.0]),
        ];

        let matches = rank(&probe, &gallery, DistanceMetric::Cosine, 0.68);
        assert_eq!(matches.len(), 1);
        assert!(matches[0].distance.abs() < 1e-6);
    }

    #[test]
    fn test_rank_ties_break_on_path() {
        let probe = emb(&[1.0, 0.0]);
        let gallery = vec![face("/p/b.jpg", &[1.0, 0.0]), face("/p/a.jpg", &[1.0, 0.0])];
        let matches = rank(&probe, &gallery, DistanceMetric::Cosine, 0.5);
        assert_eq!(matches[0].path, PathBuf::from("/p/a.jpg"));
    }

    #[test]
    fn test_rank_threshold_is_inclusive() {
        let probe = emb(&[1.0, 0.0]);
        let gallery = vec![face("/p/orth.jpg", &[0.0, 1.0])];
        assert_eq!(rank(&probe, &gallery, DistanceMetric::Cosine, 1.0).len(), 1);
        assert!(rank(&probe, &gallery, DistanceMetric::Cosine, 0.99).is_empty());
    }

    #[test]
    fn test_rank_empty_gallery() {
        assert!(rank(&emb(&[1.0]), &[], DistanceMetric::Cosine, 0.68).is_empty());
    }
}
