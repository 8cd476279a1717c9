use anyhow::{Context, Result};
use emocap_core::{MeshOptions, SessionOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Collector configuration.
///
/// Resolved as: defaults, then an optional TOML file, then `EMOCAP_*`
/// environment variables. Command-line flags are applied by the caller last.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Directory containing `face_detector.onnx` and `face_landmark.onnx`.
    pub model_dir: PathBuf,
    /// CSV file samples are appended to.
    pub dataset_path: PathBuf,
    /// Keystroke wait per loop iteration, in milliseconds.
    pub key_poll_ms: u64,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
    /// Start the on-screen counters from the dataset's existing row counts.
    pub seed_counts_from_dataset: bool,
    /// Print dataset-wide label counts when the session ends.
    pub print_summary: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            frame_width: 640,
            frame_height: 480,
            model_dir: emocap_core::default_model_dir(),
            dataset_path: PathBuf::from("face_mesh_emotion_dataset.csv"),
            key_poll_ms: 1,
            min_detection_confidence: 0.7,
            min_tracking_confidence: 0.5,
            seed_counts_from_dataset: false,
            print_summary: true,
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut config = match file {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Override fields from `EMOCAP_*` variables. Unparseable values are ignored.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("EMOCAP_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("EMOCAP_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("EMOCAP_DATASET") {
            self.dataset_path = PathBuf::from(v);
        }
        env_parse(&lookup, "EMOCAP_FRAME_WIDTH", &mut self.frame_width);
        env_parse(&lookup, "EMOCAP_FRAME_HEIGHT", &mut self.frame_height);
        env_parse(&lookup, "EMOCAP_KEY_POLL_MS", &mut self.key_poll_ms);
        env_parse(
            &lookup,
            "EMOCAP_MIN_DETECTION_CONFIDENCE",
            &mut self.min_detection_confidence,
        );
        env_parse(
            &lookup,
            "EMOCAP_MIN_TRACKING_CONFIDENCE",
            &mut self.min_tracking_confidence,
        );
        if let Some(v) = lookup("EMOCAP_SEED_COUNTS") {
            self.seed_counts_from_dataset = v != "0";
        }
        if let Some(v) = lookup("EMOCAP_PRINT_SUMMARY") {
            self.print_summary = v != "0";
        }
    }

    pub fn mesh_options(&self) -> MeshOptions {
        MeshOptions {
            min_detection_confidence: self.min_detection_confidence,
            min_tracking_confidence: self.min_tracking_confidence,
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            key_timeout: Duration::from_millis(self.key_poll_ms),
            ..SessionOptions::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.parse() {
            Ok(v) => *target = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment value"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides_defaults() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("EMOCAP_CAMERA_DEVICE", "/dev/video4"),
            ("EMOCAP_DATASET", "/data/emotions.csv"),
            ("EMOCAP_KEY_POLL_MS", "15"),
            ("EMOCAP_MIN_DETECTION_CONFIDENCE", "0.9"),
            ("EMOCAP_SEED_COUNTS", "1"),
            ("EMOCAP_PRINT_SUMMARY", "0"),
        ]));
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.dataset_path, PathBuf::from("/data/emotions.csv"));
        assert_eq!(config.key_poll_ms, 15);
        assert_eq!(config.min_detection_confidence, 0.9);
        assert!(config.seed_counts_from_dataset);
        assert!(!config.print_summary);
        assert_eq!(config.session_options().key_timeout, Duration::from_millis(15));
    }

    #[test]
    fn test_bad_env_value_keeps_default() {
        let mut config = Config::default();
        config.apply_env(env(&[("EMOCAP_FRAME_WIDTH", "wide")]));
        assert_eq!(config.frame_width, 640);
    }

    #[test]
    fn test_toml_file_partial() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("emocap.toml");
        std::fs::write(
            &path,
            "camera_device = \"/dev/video2\"\nmin_tracking_confidence = 0.6\n",
        )
        .unwrap();

        let config = Config::from_toml_file(&path).unwrap();
        assert_eq!(config.camera_device, "/dev/video2");
        assert_eq!(config.min_tracking_confidence, 0.6);
        assert_eq!(config.frame_height, 480);
        assert_eq!(config.mesh_options().min_detection_confidence, 0.7);
    }

    #[test]
    fn test_toml_unknown_field_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("emocap.toml");
        std::fs::write(&path, "camera = \"/dev/video2\"\n").unwrap();
        assert!(Config::from_toml_file(&path).is_err());
    }
}
