//! The three named models and the single-face descriptor pipeline built on them.

use crate::detector::{DetectorError, FaceDetector};
use crate::frame::Frame;
use crate::landmarks::{LandmarkError, LandmarkPredictor};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Descriptor, FivePoints};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One of the three inference models a [`ModelSet`] is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Detector,
    Landmark,
    Recognizer,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [ModelKind::Detector, ModelKind::Landmark, ModelKind::Recognizer];

    /// Default file name under the model base location.
    pub fn default_file_name(self) -> &'static str {
        match self {
            ModelKind::Detector => "det_10g.onnx",
            ModelKind::Landmark => "2d106det.onnx",
            ModelKind::Recognizer => "w600k_r50.onnx",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ModelKind::Detector => "detector",
            ModelKind::Landmark => "landmark",
            ModelKind::Recognizer => "recognizer",
        })
    }
}

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("landmark: {0}")]
    Landmark(#[from] LandmarkError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// All three models, loaded. Holding a `ModelSet` is proof that nothing is
/// left unloaded, so a comparison can never run against a partial set.
pub struct ModelSet {
    detector: FaceDetector,
    landmark: LandmarkPredictor,
    recognizer: FaceRecognizer,
}

impl ModelSet {
    pub fn new(detector: FaceDetector, landmark: LandmarkPredictor, recognizer: FaceRecognizer) -> Self {
        Self {
            detector,
            landmark,
            recognizer,
        }
    }

    pub fn set_detection_threshold(&mut self, threshold: f32) {
        self.detector.set_confidence_threshold(threshold);
    }

    /// Detect the most confident face, refine its landmarks and extract a descriptor.
    ///
    /// `Ok(None)` means no face was found in the frame.
    pub fn describe(&mut self, frame: &Frame) -> Result<Option<Descriptor>, AnalyzeError> {
        let faces = self.detector.detect(frame)?;
        let Some(face) = faces.first() else {
            tracing::debug!(width = frame.width, height = frame.height, "no face detected");
            return Ok(None);
        };
        tracing::debug!(
            confidence = face.confidence,
            candidates = faces.len(),
            "selected face"
        );

        let points = pick_points(self.landmark.five_points(frame, face), face.landmarks)?;
        let descriptor = self.recognizer.extract(frame, &points)?;
        Ok(Some(descriptor))
    }
}

/// Refined landmarks when the landmark model produced them, otherwise the
/// detector's own keypoints. Fails only when neither is available.
fn pick_points(
    refined: Result<FivePoints, LandmarkError>,
    coarse: Option<FivePoints>,
) -> Result<FivePoints, LandmarkError> {
    match (refined, coarse) {
        (Ok(points), _) => Ok(points),
        (Err(error), Some(points)) => {
            tracing::warn!(%error, "landmark refinement failed, aligning on detector keypoints");
            Ok(points)
        }
        (Err(error), None) => Err(error),
    }
}
