//! Model loading: fetch the three ONNX files and bring up the inference engine.

use crate::config::Config;
use crate::engine::{self, EngineHandle};
use crate::pipeline::ModelLoader;
use facematch_core::{FaceDetector, FaceRecognizer, LandmarkPredictor, ModelKind, ModelSet};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelLoadError {
    #[error("{model} model not found at {location}")]
    NotFound { model: ModelKind, location: String },
    #[error("fetching {model} model from {location} failed: {reason}")]
    Fetch {
        model: ModelKind,
        location: String,
        reason: String,
    },
    #[error("building {model} model failed: {reason}")]
    Build { model: ModelKind, reason: String },
    #[error("starting inference engine failed: {0}")]
    Engine(String),
}

/// Base location the model files are fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelLocation {
    Directory(PathBuf),
    /// `http(s)` base URL, without trailing slash.
    Remote(String),
}

impl ModelLocation {
    /// Relative directories resolve against `base_dir`.
    pub fn parse(raw: &str, base_dir: &Path) -> Self {
        let raw = raw.trim();
        let lower = raw.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return ModelLocation::Remote(raw.trim_end_matches('/').to_string());
        }
        let path = PathBuf::from(raw);
        if path.is_absolute() {
            ModelLocation::Directory(path)
        } else {
            ModelLocation::Directory(base_dir.join(path))
        }
    }

    fn locate(&self, file: &str) -> String {
        match self {
            ModelLocation::Directory(dir) => dir.join(file).to_string_lossy().into_owned(),
            ModelLocation::Remote(base) => format!("{base}/{file}"),
        }
    }
}

/// Loads the detector, landmark and recognizer models and spawns the engine.
pub struct OnnxLoader {
    location: ModelLocation,
    files: [String; 3],
    intra_threads: usize,
    detection_threshold: f32,
    client: reqwest::Client,
}

impl OnnxLoader {
    pub fn from_config(config: &Config, client: reqwest::Client) -> Self {
        Self {
            location: ModelLocation::parse(&config.models, &config.base_dir),
            files: ModelKind::ALL.map(|kind| config.model_file(kind).to_string()),
            intra_threads: config.intra_threads,
            detection_threshold: config.detection_threshold,
            client,
        }
    }

    fn file(&self, kind: ModelKind) -> &str {
        match kind {
            ModelKind::Detector => &self.files[0],
            ModelKind::Landmark => &self.files[1],
            ModelKind::Recognizer => &self.files[2],
        }
    }

    async fn fetch(&self, kind: ModelKind) -> Result<Vec<u8>, ModelLoadError> {
        let location = self.location.locate(self.file(kind));
        tracing::debug!(model = %kind, %location, "fetching model");

        match &self.location {
            ModelLocation::Directory(_) => tokio::fs::read(&location).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ModelLoadError::NotFound {
                        model: kind,
                        location: location.clone(),
                    }
                } else {
                    ModelLoadError::Fetch {
                        model: kind,
                        location: location.clone(),
                        reason: e.to_string(),
                    }
                }
            }),
            ModelLocation::Remote(_) => {
                let fetch_err = |e: reqwest::Error| ModelLoadError::Fetch {
                    model: kind,
                    location: location.clone(),
                    reason: e.to_string(),
                };
                let response = self.client.get(&location).send().await.map_err(fetch_err)?;
                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    return Err(ModelLoadError::NotFound {
                        model: kind,
                        location: location.clone(),
                    });
                }
                let response = response.error_for_status().map_err(fetch_err)?;
                Ok(response.bytes().await.map_err(fetch_err)?.to_vec())
            }
        }
    }

    /// Fetch one model and build its session off the async threads.
    async fn load_one<T, E>(
        &self,
        kind: ModelKind,
        build: fn(&[u8], usize) -> Result<T, E>,
    ) -> Result<T, ModelLoadError>
    where
        T: Send + 'static,
        E: std::fmt::Display + 'static,
    {
        let bytes = self.fetch(kind).await?;
        let threads = self.intra_threads;
        let size = bytes.len();
        let built = tokio::task::spawn_blocking(move || build(&bytes, threads).map_err(|e| e.to_string()))
            .await
            .map_err(|e| ModelLoadError::Build {
                model: kind,
                reason: e.to_string(),
            })?
            .map_err(|reason| ModelLoadError::Build { model: kind, reason })?;
        tracing::info!(model = %kind, bytes = size, "model loaded");
        Ok(built)
    }
}

impl ModelLoader for OnnxLoader {
    type Extractor = EngineHandle;

    async fn load(&self) -> Result<EngineHandle, ModelLoadError> {
        let started = Instant::now();

        let (detector, landmark, recognizer) = tokio::try_join!(
            self.load_one(ModelKind::Detector, FaceDetector::from_memory),
            self.load_one(ModelKind::Landmark, LandmarkPredictor::from_memory),
            self.load_one(ModelKind::Recognizer, FaceRecognizer::from_memory),
        )?;

        let mut models = ModelSet::new(detector, landmark, recognizer);
        models.set_detection_threshold(self.detection_threshold);

        let handle = engine::spawn_engine(models).map_err(|e| ModelLoadError::Engine(e.to_string()))?;
        tracing::info!(
            location = ?self.location,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "all models loaded"
        );
        Ok(handle)
    }
}
