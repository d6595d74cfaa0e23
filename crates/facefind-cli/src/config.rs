use anyhow::{bail, Context, Result};
use facefind_core::{DetectorOptions, DistanceMetric};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// CLI configuration.
///
/// Sources, lowest precedence first: built-in defaults, the TOML config file,
/// `FACEFIND_*` environment variables. Command-line flags are applied on top
/// by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory containing `det_10g.onnx` and `w600k_r50.onnx`.
    pub model_dir: PathBuf,
    /// SQLite file caching gallery face embeddings.
    pub index_path: PathBuf,
    /// V4L2 device used for camera capture.
    pub camera_device: String,
    /// Frames discarded before a still is taken (auto-exposure settling).
    pub warmup_frames: usize,
    pub metric: DistanceMetric,
    /// Match threshold; `None` uses the metric's default.
    pub threshold: Option<f32>,
    /// Minimum SCRFD score for a face.
    pub detection_threshold: f32,
    /// Faces smaller than this (shorter side, pixels) are ignored.
    pub min_face_size: f32,
    pub grid_columns: usize,
    /// Cell size of the contact sheet, in pixels.
    pub thumbnail_size: u32,
}

/// Shape of `config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    model_dir: Option<PathBuf>,
    index_path: Option<PathBuf>,
    camera_device: Option<String>,
    warmup_frames: Option<usize>,
    metric: Option<DistanceMetric>,
    threshold: Option<f32>,
    detection_threshold: Option<f32>,
    min_face_size: Option<f32>,
    grid_columns: Option<usize>,
    thumbnail_size: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = facefind_core::data_dir();
        Self {
            model_dir: facefind_core::default_model_dir(),
            index_path: data_dir.join("index.db"),
            camera_device: "/dev/video0".to_string(),
            warmup_frames: 10,
            metric: DistanceMetric::Cosine,
            threshold: None,
            detection_threshold: 0.5,
            min_face_size: 20.0,
            grid_columns: 3,
            thumbnail_size: 256,
        }
    }
}

impl Config {
    /// Load from the config file (if present) and the process environment.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var_os("FACEFIND_CONFIG").map(PathBuf::from);
        let path = explicit.clone().unwrap_or_else(default_config_path);

        let file = match std::fs::read_to_string(&path) {
            Ok(text) => Some(
                toml::from_str::<FileConfig>(&text)
                    .with_context(|| format!("invalid config file {}", path.display()))?,
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && explicit.is_none() => None,
            Err(e) => {
                return Err(e).with_context(|| format!("could not read config file {}", path.display()))
            }
        };
        if file.is_some() {
            tracing::debug!(path = %path.display(), "loaded config file");
        }

        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    fn from_sources(file: Option<FileConfig>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Config::default();

        if let Some(f) = file {
            cfg.model_dir = f.model_dir.unwrap_or(cfg.model_dir);
            cfg.index_path = f.index_path.unwrap_or(cfg.index_path);
            cfg.camera_device = f.camera_device.unwrap_or(cfg.camera_device);
            cfg.warmup_frames = f.warmup_frames.unwrap_or(cfg.warmup_frames);
            cfg.metric = f.metric.unwrap_or(cfg.metric);
            cfg.threshold = f.threshold.or(cfg.threshold);
            cfg.detection_threshold = f.detection_threshold.unwrap_or(cfg.detection_threshold);
            cfg.min_face_size = f.min_face_size.unwrap_or(cfg.min_face_size);
            cfg.grid_columns = f.grid_columns.unwrap_or(cfg.grid_columns);
            cfg.thumbnail_size = f.thumbnail_size.unwrap_or(cfg.thumbnail_size);
        }

        if let Some(v) = env("FACEFIND_MODEL_DIR") {
            cfg.model_dir = PathBuf::from(v);
        }
        if let Some(v) = env("FACEFIND_INDEX_PATH") {
            cfg.index_path = PathBuf::from(v);
        }
        if let Some(v) = env("FACEFIND_CAMERA_DEVICE") {
            cfg.camera_device = v;
        }
        cfg.warmup_frames = env_parse(&env, "FACEFIND_WARMUP_FRAMES", cfg.warmup_frames);
        let metric = env_parse(&env, "FACEFIND_METRIC", cfg.metric);
        if metric != cfg.metric {
            // A threshold from a lower layer was chosen for the other metric.
            cfg.metric = metric;
            cfg.threshold = None;
        }
        if let Some(raw) = env("FACEFIND_THRESHOLD") {
            match raw.trim().parse::<f32>() {
                Ok(t) => cfg.threshold = Some(t),
                Err(_) => tracing::warn!(key = "FACEFIND_THRESHOLD", value = %raw, "ignoring unparsable environment variable"),
            }
        }
        cfg.detection_threshold = env_parse(&env, "FACEFIND_DETECTION_THRESHOLD", cfg.detection_threshold);
        cfg.min_face_size = env_parse(&env, "FACEFIND_MIN_FACE_SIZE", cfg.min_face_size);
        cfg.grid_columns = env_parse(&env, "FACEFIND_GRID_COLUMNS", cfg.grid_columns);
        cfg.thumbnail_size = env_parse(&env, "FACEFIND_THUMBNAIL_SIZE", cfg.thumbnail_size);

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.threshold {
            if !(t > 0.0 && t.is_finite()) {
                bail!("threshold must be a positive number, got {t}");
            }
        }
        if !(self.detection_threshold > 0.0 && self.detection_threshold < 1.0) {
            bail!("detection_threshold must be in (0, 1), got {}", self.detection_threshold);
        }
        if self.grid_columns == 0 {
            bail!("grid_columns must be at least 1");
        }
        if self.thumbnail_size < 16 {
            bail!("thumbnail_size must be at least 16 pixels, got {}", self.thumbnail_size);
        }
        Ok(())
    }

    /// Effective match threshold for the configured metric.
    pub fn threshold(&self) -> f32 {
        self.threshold.unwrap_or_else(|| self.metric.default_threshold())
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            confidence_threshold: self.detection_threshold,
            min_face_size: self.min_face_size,
        }
    }
}

/// `$XDG_CONFIG_HOME/facefind/config.toml`, falling back to `~/.config`.
fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            Path::new(&home).join(".config")
        })
        .join("facefind")
        .join("config.toml")
}

fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match env(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment variable");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::from_sources(None, env_from(&[])).unwrap();
        assert_eq!(cfg.metric, DistanceMetric::Cosine);
        assert_eq!(cfg.grid_columns, 3);
        assert!((cfg.threshold() - 0.68).abs() < 1e-6);
        assert!(cfg.model_dir.ends_with("facefind/models"));
        assert!(cfg.index_path.ends_with("facefind/index.db"));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file: FileConfig = toml::from_str(
            r#"
            metric = "euclidean_l2"
            grid_columns = 4
            camera_device = "/dev/video2"
            "#,
        )
        .unwrap();
        let cfg = Config::from_sources(Some(file), env_from(&[])).unwrap();
        assert_eq!(cfg.metric, DistanceMetric::EuclideanL2);
        assert!((cfg.threshold() - 1.13).abs() < 1e-6);
        assert_eq!(cfg.grid_columns, 4);
        assert_eq!(cfg.camera_device, "/dev/video2");
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str("threshold = 0.5\nwarmup_frames = 2").unwrap();
        let env = env_from(&[
            ("FACEFIND_THRESHOLD", "0.4"),
            ("FACEFIND_MODEL_DIR", "/opt/models"),
            ("FACEFIND_WARMUP_FRAMES", "not-a-number"),
        ]);
        let cfg = Config::from_sources(Some(file), env).unwrap();
        assert_eq!(cfg.threshold, Some(0.4));
        assert_eq!(cfg.model_dir, PathBuf::from("/opt/models"));
        // Unparsable values fall back to the lower layer.
        assert_eq!(cfg.warmup_frames, 2);
    }

    #[test]
    fn test_env_metric_resets_file_threshold() {
        let file: FileConfig = toml::from_str("metric = \"cosine\"\nthreshold = 0.4").unwrap();
        let cfg = Config::from_sources(Some(file), env_from(&[("FACEFIND_METRIC", "euclidean_l2")])).unwrap();
        assert_eq!(cfg.metric, DistanceMetric::EuclideanL2);
        assert_eq!(cfg.threshold, None);
        assert!((cfg.threshold() - 1.13).abs() < 1e-6);

        // Same metric again: the file threshold still applies.
        let file: FileConfig = toml::from_str("metric = \"cosine\"\nthreshold = 0.4").unwrap();
        let cfg = Config::from_sources(Some(file), env_from(&[("FACEFIND_METRIC", "cosine")])).unwrap();
        assert_eq!(cfg.threshold, Some(0.4));

        // An explicit env threshold wins over the reset.
        let file: FileConfig = toml::from_str("threshold = 0.4").unwrap();
        let env = env_from(&[("FACEFIND_METRIC", "l2"), ("FACEFIND_THRESHOLD", "1.0")]);
        let cfg = Config::from_sources(Some(file), env).unwrap();
        assert_eq!(cfg.threshold, Some(1.0));
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        assert!(toml::from_str::<FileConfig>("colour = \"blue\"").is_err());
    }

    #[test]
    fn test_validation() {
        assert!(Config::from_sources(None, env_from(&[("FACEFIND_GRID_COLUMNS", "0")])).is_err());
        assert!(Config::from_sources(None, env_from(&[("FACEFIND_THRESHOLD", "-1")])).is_err());
        assert!(Config::from_sources(None, env_from(&[("FACEFIND_DETECTION_THRESHOLD", "1.5")])).is_err());
    }
}
