use facematch_core::ModelKind;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory or http(s) base URL holding the three ONNX model files.
    pub models: String,
    pub detector_model: String,
    pub landmark_model: String,
    pub recognizer_model: String,
    /// Euclidean distance below which two faces are the same person.
    /// `None` uses the cutoff calibrated for the recognition model.
    pub match_threshold: Option<f32>,
    /// Minimum SCRFD score for a detection to count as a face.
    pub detection_threshold: f32,
    /// Base directory for relative image references.
    pub base_dir: PathBuf,
    /// Upper bound on a single image fetch. `None` waits indefinitely.
    pub fetch_timeout: Option<Duration>,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
}

impl Config {
    /// Load configuration from `FACEMATCH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let parse_f32 = |key: &str, default: f32| get(key).and_then(|v| v.parse().ok()).unwrap_or(default);

        let base_dir = get("FACEMATCH_BASE_DIR")
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            models: get("FACEMATCH_MODEL_DIR").unwrap_or_else(|| "./models".to_string()),
            detector_model: get("FACEMATCH_DETECTOR_MODEL")
                .unwrap_or_else(|| ModelKind::Detector.default_file_name().to_string()),
            landmark_model: get("FACEMATCH_LANDMARK_MODEL")
                .unwrap_or_else(|| ModelKind::Landmark.default_file_name().to_string()),
            recognizer_model: get("FACEMATCH_RECOGNIZER_MODEL")
                .unwrap_or_else(|| ModelKind::Recognizer.default_file_name().to_string()),
            match_threshold: get("FACEMATCH_MATCH_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .filter(|t: &f32| t.is_finite() && *t > 0.0),
            detection_threshold: parse_f32("FACEMATCH_DETECTION_THRESHOLD", 0.5),
            base_dir,
            fetch_timeout: get("FACEMATCH_TIMEOUT_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs),
            intra_threads: get("FACEMATCH_INTRA_THREADS")
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(2),
        }
    }

    /// File name of the given model under [`Config::models`].
    pub fn model_file(&self, kind: ModelKind) -> &str {
        match kind {
            ModelKind::Detector => &self.detector_model,
            ModelKind::Landmark => &self.landmark_model,
            ModelKind::Recognizer => &self.recognizer_model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]);
        assert_eq!(c.models, "./models");
        assert_eq!(c.match_threshold, None);
        assert_eq!(c.detection_threshold, 0.5);
        assert_eq!(c.fetch_timeout, None);
        assert_eq!(c.intra_threads, 2);
        assert_eq!(c.model_file(ModelKind::Landmark), "2d106det.onnx");
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("FACEMATCH_MODEL_DIR", "https://cdn.example/models"),
            ("FACEMATCH_MATCH_THRESHOLD", "0.45"),
            ("FACEMATCH_TIMEOUT_SECS", "15"),
            ("FACEMATCH_RECOGNIZER_MODEL", "glint.onnx"),
            ("FACEMATCH_BASE_DIR", "/srv/pages"),
        ]);
        assert_eq!(c.models, "https://cdn.example/models");
        assert_eq!(c.match_threshold, Some(0.45));
        assert_eq!(c.fetch_timeout, Some(Duration::from_secs(15)));
        assert_eq!(c.model_file(ModelKind::Recognizer), "glint.onnx");
        assert_eq!(c.base_dir, PathBuf::from("/srv/pages"));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let c = config(&[
            ("FACEMATCH_MATCH_THRESHOLD", "high"),
            ("FACEMATCH_TIMEOUT_SECS", "0"),
            ("FACEMATCH_INTRA_THREADS", "0"),
        ]);
        assert_eq!(c.match_threshold, None);
        assert_eq!(c.fetch_timeout, None);
        assert_eq!(c.intra_threads, 2);
    }
}
